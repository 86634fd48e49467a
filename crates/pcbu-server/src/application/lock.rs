//! The lock entity: per-desktop availability state machine and unlock action.
//!
//! A [`Lock`] wraps one immutable [`LockRecord`] and tracks exactly two
//! states:
//!
//! ```text
//! Idle    (available=false, locked=false)   ── accepted unlock request ──►
//! Pending (available=true,  locked=true)    ── user unlock action ───────► Idle
//! ```
//!
//! `Pending` means the remote desktop has confirmed its presence through an
//! authenticated request on the unlock listener and is waiting for the
//! user-side unlock action. The two flags move together by construction:
//! there is no state where they differ.
//!
//! # The rebindable unlock channel
//!
//! The unlock action does not talk to the network itself. It goes through an
//! [`UnlockChannel`] that the currently running listener for the lock's port
//! owns. The lock only holds a `Weak` reference, re-set on every listener
//! replacement: once a listener is retired its channel is dropped and the
//! weak reference dies, so a stale lock can never invoke a retired listener.
//! With no live channel bound, `unlock` fails with
//! [`LockError::DeviceUnreachable`] and the state is left untouched.
//!
//! # State visibility
//!
//! Every state transition is pushed synchronously through the [`StateSink`]
//! supplied at construction — the entity framework's "write state" hook —
//! so subscribers (UI, automations) observe availability changes without
//! polling.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use pcbu_core::{LockRecord, PairingId, RemoteUnlockError};

/// Error type for lock actions.
#[derive(Debug, Error)]
pub enum LockError {
    /// No unlock listener is currently bound for this lock's port; the
    /// device cannot be reached until the next refresh. Recoverable by
    /// retrying once connectivity returns.
    #[error("device is currently unreachable: no unlock listener is bound")]
    DeviceUnreachable,
    /// The remote unlock round trip failed.
    #[error(transparent)]
    RemoteUnlock(#[from] RemoteUnlockError),
}

/// The two availability states a lock can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    /// No outstanding unlock request. `available=false, locked=false`.
    Idle,
    /// A verified unlock request is awaiting the user's action.
    /// `available=true, locked=true`.
    Pending,
}

/// Point-in-time view of a lock's externally visible state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStateSnapshot {
    /// The lock's unique id (its pairing id).
    pub pairing_id: PairingId,
    /// Display name (the remote host name).
    pub name: String,
    /// Whether the entity is reachable/actionable.
    pub available: bool,
    /// Whether the entity reports as locked.
    pub locked: bool,
}

/// The entity framework's "write state" hook.
///
/// Called synchronously on every state transition. Implementations must be
/// cheap and non-blocking; the bridge implementation pushes onto an
/// unbounded-enough mpsc channel.
pub trait StateSink: Send + Sync {
    /// Receives the lock's state after a transition.
    fn write_state(&self, snapshot: LockStateSnapshot);
}

/// A state sink that discards every notification.
///
/// Useful for wiring locks in tests that do not observe state changes.
pub struct NullStateSink;

impl StateSink for NullStateSink {
    fn write_state(&self, _snapshot: LockStateSnapshot) {}
}

/// The authoritative unlock callback, owned by the running listener.
///
/// Implemented by the router runtime; locks reach it only through a weak
/// reference so retirement of the listener invalidates the binding.
#[async_trait]
pub trait UnlockChannel: Send + Sync {
    /// Performs the authenticated remote-unlock round trip for `record`.
    async fn remote_unlock(&self, record: &LockRecord) -> Result<(), RemoteUnlockError>;
}

/// In-process representation of one paired desktop.
pub struct Lock {
    record: LockRecord,
    state: Mutex<LockState>,
    channel: Mutex<Option<Weak<dyn UnlockChannel>>>,
    sink: Arc<dyn StateSink>,
}

impl Lock {
    /// Creates a lock in the `Idle` state with no channel bound.
    pub fn new(record: LockRecord, sink: Arc<dyn StateSink>) -> Self {
        Self {
            record,
            state: Mutex::new(LockState::Idle),
            channel: Mutex::new(None),
            sink,
        }
    }

    /// The immutable record this lock wraps.
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Display name exposed to the entity framework.
    pub fn name(&self) -> &str {
        self.record.name()
    }

    /// Unique id exposed to the entity framework (the pairing id).
    pub fn unique_id(&self) -> &PairingId {
        &self.record.pairing_id
    }

    /// The port this lock's listener runs on. Fixed for the lock's lifetime.
    pub fn port(&self) -> u16 {
        self.record.server_port
    }

    /// Whether the entity is currently actionable.
    pub fn available(&self) -> bool {
        *self.state.lock().expect("lock poisoned") == LockState::Pending
    }

    /// Whether the entity currently reports as locked.
    pub fn locked(&self) -> bool {
        // Tracks `available` exactly; both derive from the same state.
        self.available()
    }

    /// Returns the externally visible state as a snapshot.
    pub fn snapshot(&self) -> LockStateSnapshot {
        let pending = self.available();
        LockStateSnapshot {
            pairing_id: self.record.pairing_id.clone(),
            name: self.record.name().to_string(),
            available: pending,
            locked: pending,
        }
    }

    /// Binds this lock's unlock callback to a listener's channel,
    /// superseding any previous binding.
    pub fn bind_channel(&self, channel: &Arc<dyn UnlockChannel>) {
        *self.channel.lock().expect("lock poisoned") = Some(Arc::downgrade(channel));
    }

    /// Transition Idle → Pending, triggered by the router's accept hook.
    ///
    /// A request arriving while already `Pending` is absorbed without a
    /// second notification.
    pub fn mark_unlock_pending(&self) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if *state == LockState::Pending {
                debug!(pairing_id = %self.record.pairing_id, "unlock request while already pending");
                return;
            }
            *state = LockState::Pending;
        }
        info!(pairing_id = %self.record.pairing_id, name = %self.record.name(), "lock is awaiting user unlock");
        self.sink.write_state(self.snapshot());
    }

    /// The user-invoked unlock action.
    ///
    /// Invokes the currently bound channel to perform the remote unlock and
    /// resets to `Idle` only after that call completes successfully. On
    /// failure the lock stays `Pending` so the action can be retried.
    ///
    /// # Errors
    ///
    /// [`LockError::DeviceUnreachable`] when no live channel is bound (the
    /// port has no running listener); [`LockError::RemoteUnlock`] when the
    /// round trip fails.
    pub async fn unlock(&self) -> Result<(), LockError> {
        let channel = self
            .channel
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(LockError::DeviceUnreachable)?;

        channel.remote_unlock(&self.record).await?;

        let transitioned = {
            let mut state = self.state.lock().expect("lock poisoned");
            std::mem::replace(&mut *state, LockState::Idle) == LockState::Pending
        };
        if transitioned {
            info!(pairing_id = %self.record.pairing_id, "unlocked; returning to idle");
            self.sink.write_state(self.snapshot());
        }
        Ok(())
    }

    /// The lock action. Accepted but has no effect: the remote desktop's
    /// physical lock state is outside this system's control.
    pub fn lock(&self) {
        debug!(pairing_id = %self.record.pairing_id, "lock action ignored; remote lock state is not controllable");
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("pairing_id", &self.record.pairing_id)
            .field("port", &self.record.server_port)
            .field("pending", &self.available())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
