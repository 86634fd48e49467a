//! Entity-framework bridge: exposes the manager and its locks to the
//! surrounding integration framework.
//!
//! The framework interacts with this layer in three ways:
//!
//! 1. **Commands** — `add_lock`, `remove_lock`, `unlock_lock`, `lock_lock`,
//!    `get_locks`, all delegating to the shared [`AppState`] and returning
//!    the uniform [`CommandResult`] envelope so every response has the same
//!    shape.
//! 2. **State feed** — every lock state transition is pushed through the
//!    "write state" hook onto an mpsc channel the framework subscribes to.
//! 3. **DTOs** — [`LockDto`] carries only serialisable presentation fields;
//!    credentials never cross this boundary outward.
//!
//! All fields of `AppState` sit behind a `tokio::sync::Mutex`: commands run
//! concurrently on the async runtime and the mutex both protects the state
//! and serializes registry-mutate + refresh sequences, which upholds the
//! one-runtime-per-port invariant.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use pcbu_core::{LockRecord, UnlockProtocol};

use crate::application::lock::{Lock, LockError, LockStateSnapshot, StateSink};
use crate::infrastructure::network::server_manager::UnlockServerManager;

/// Capacity of the state feed; transitions are rare (pairing-time and
/// per-unlock events), so a small buffer suffices.
const STATE_FEED_CAPACITY: usize = 64;

// ── Shared application state ──────────────────────────────────────────────────

/// Application state shared between command invocations.
pub struct AppState {
    /// The lifecycle manager; the mutex serializes all mutations.
    pub manager: Mutex<UnlockServerManager>,
    /// The write-state hook handed to every lock this bridge creates.
    sink: Arc<dyn StateSink>,
}

impl AppState {
    /// Initialises the bridge around a manager bound to `bind_addr`.
    ///
    /// Returns the shared state together with the receiver end of the state
    /// feed the entity framework subscribes to.
    pub fn new(
        bind_addr: IpAddr,
        protocol: Arc<dyn UnlockProtocol>,
    ) -> (Arc<Self>, mpsc::Receiver<LockStateSnapshot>) {
        let (tx, rx) = mpsc::channel(STATE_FEED_CAPACITY);
        let state = Arc::new(Self {
            manager: Mutex::new(UnlockServerManager::new(bind_addr, protocol)),
            sink: Arc::new(ChannelStateSink { tx }),
        });
        (state, rx)
    }

    /// Tears the integration down: retires every running listener.
    pub async fn shutdown(&self) {
        self.manager.lock().await.shutdown().await;
    }
}

/// Write-state hook that forwards snapshots onto the state feed.
struct ChannelStateSink {
    tx: mpsc::Sender<LockStateSnapshot>,
}

impl StateSink for ChannelStateSink {
    fn write_state(&self, snapshot: LockStateSnapshot) {
        // Transitions happen from async context; try_send keeps the hook
        // non-blocking. A full buffer means the subscriber is gone or stuck.
        if let Err(e) = self.tx.try_send(snapshot) {
            warn!("state feed subscriber not keeping up, dropping update: {e}");
        }
    }
}

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// DTO representing one lock entity as shown to the framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDto {
    pub pairing_id: String,
    pub name: String,
    pub desktop_addr: String,
    pub server_port: u16,
    pub available: bool,
    pub locked: bool,
}

impl From<&Arc<Lock>> for LockDto {
    fn from(lock: &Arc<Lock>) -> Self {
        let snapshot = lock.snapshot();
        Self {
            pairing_id: snapshot.pairing_id,
            name: snapshot.name,
            desktop_addr: lock.record().desktop_addr.to_string(),
            server_port: lock.port(),
            available: snapshot.available,
            locked: snapshot.locked,
        }
    }
}

/// Unified response envelope for bridge commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Returns all currently registered locks, sorted by name.
pub async fn get_locks(state: Arc<AppState>) -> CommandResult<Vec<LockDto>> {
    let manager = state.manager.lock().await;
    let registry = manager.registry();
    let mut dtos: Vec<LockDto> = registry
        .ports()
        .into_iter()
        .flat_map(|port| registry.locks_for_port(port))
        .map(|lock| LockDto::from(&lock))
        .collect();
    dtos.sort_by(|a, b| a.name.cmp(&b.name));
    CommandResult::ok(dtos)
}

/// Registers a new paired desktop and starts (or replaces) the unlock
/// listener for its port.
///
/// A record whose pairing id is already registered is rejected without
/// touching the registry — duplicate pairings are a configuration error.
pub async fn add_lock(state: Arc<AppState>, record: LockRecord) -> CommandResult<LockDto> {
    let mut manager = state.manager.lock().await;

    if manager.registry().find_by_pairing_id(&record.pairing_id).is_some() {
        return CommandResult::err(format!(
            "pairing {} is already registered",
            record.pairing_id
        ));
    }

    let lock = Arc::new(Lock::new(record, Arc::clone(&state.sink)));
    let dto = LockDto::from(&lock);
    match manager.add_lock(lock).await {
        Ok(()) => CommandResult::ok(dto),
        Err(e) => CommandResult::err(format!("failed to start unlock listener: {e}")),
    }
}

/// Unregisters a paired desktop and refreshes its port's listener.
pub async fn remove_lock(state: Arc<AppState>, record: LockRecord) -> CommandResult<()> {
    let mut manager = state.manager.lock().await;
    match manager.remove_lock(record.server_port, record.desktop_addr).await {
        Ok(_removed) => CommandResult::ok(()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// The user-invoked unlock action for the lock with `pairing_id`.
///
/// The unreachable-device case is reported verbatim so the framework can
/// present it as a retryable condition rather than a generic failure.
pub async fn unlock_lock(state: Arc<AppState>, pairing_id: &str) -> CommandResult<LockDto> {
    let lock = {
        let manager = state.manager.lock().await;
        manager.registry().find_by_pairing_id(pairing_id)
    };
    // The manager mutex is released before awaiting the network round trip
    // so a slow unlock cannot stall membership changes.
    let Some(lock) = lock else {
        return CommandResult::err(format!("no lock with pairing id {pairing_id}"));
    };

    match lock.unlock().await {
        Ok(()) => CommandResult::ok(LockDto::from(&lock)),
        Err(e @ LockError::DeviceUnreachable) => CommandResult::err(e.to_string()),
        Err(e) => CommandResult::err(format!("unlock failed: {e}")),
    }
}

/// The lock action. Accepted for interface completeness; it has no effect.
pub async fn lock_lock(state: Arc<AppState>, pairing_id: &str) -> CommandResult<LockDto> {
    let manager = state.manager.lock().await;
    match manager.registry().find_by_pairing_id(pairing_id) {
        Some(lock) => {
            lock.lock();
            CommandResult::ok(LockDto::from(&lock))
        }
        None => CommandResult::err(format!("no lock with pairing id {pairing_id}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
