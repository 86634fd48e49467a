//! LockRegistry: bookkeeping of which locks share which listening port.
//!
//! The registry is a two-level map, `port → (desktop address → Lock)`. It
//! performs no I/O; the lifecycle manager reads per-port snapshots from it
//! and restarts listeners accordingly. A lock always lives in exactly one
//! bucket — the one keyed by its own `server_port`.
//!
//! # Snapshot semantics
//!
//! [`LockRegistry::locks_for_port`] returns an owned `Vec` of `Arc`s. Later
//! registry mutations never alter a snapshot already handed out; a running
//! listener's view of its lock set is therefore frozen at build time.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use super::lock::Lock;

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `remove` was called for a lock that is not registered. Callers must
    /// only remove locks they previously added.
    #[error("no lock registered for desktop {desktop_addr} on port {port}")]
    NotFound { port: u16, desktop_addr: IpAddr },
}

/// In-memory mapping from port to the locks served on that port.
#[derive(Default)]
pub struct LockRegistry {
    ports: HashMap<u16, HashMap<IpAddr, Arc<Lock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `lock` into the bucket for its port, replacing any lock
    /// already registered under the same desktop address.
    ///
    /// Re-registering an address under a *different* pairing id almost
    /// always indicates a stale or conflicting configuration, so the
    /// overwrite is logged as a warning before it happens.
    pub fn add(&mut self, lock: Arc<Lock>) {
        let port = lock.port();
        let addr = lock.record().desktop_addr;
        let bucket = self.ports.entry(port).or_default();
        if let Some(previous) = bucket.get(&addr) {
            if previous.unique_id() != lock.unique_id() {
                warn!(
                    port,
                    desktop_addr = %addr,
                    old_pairing_id = %previous.unique_id(),
                    new_pairing_id = %lock.unique_id(),
                    "overwriting lock for desktop address with a different pairing id; \
                     check for a stale pairing"
                );
            }
        }
        bucket.insert(addr, lock);
    }

    /// Removes the lock registered for `(port, desktop_addr)` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no such lock is registered.
    pub fn remove(&mut self, port: u16, desktop_addr: IpAddr) -> Result<Arc<Lock>, RegistryError> {
        let bucket = self
            .ports
            .get_mut(&port)
            .ok_or(RegistryError::NotFound { port, desktop_addr })?;
        let lock = bucket
            .remove(&desktop_addr)
            .ok_or(RegistryError::NotFound { port, desktop_addr })?;
        if bucket.is_empty() {
            self.ports.remove(&port);
        }
        Ok(lock)
    }

    /// Returns a snapshot of the locks currently registered for `port`.
    ///
    /// The returned vector is a copy: later registry mutations do not affect
    /// it. Empty if no lock is registered for the port.
    pub fn locks_for_port(&self, port: u16) -> Vec<Arc<Lock>> {
        self.ports
            .get(&port)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks a lock up by its pairing id, across all ports.
    pub fn find_by_pairing_id(&self, pairing_id: &str) -> Option<Arc<Lock>> {
        self.ports
            .values()
            .flat_map(|bucket| bucket.values())
            .find(|lock| lock.unique_id() == pairing_id)
            .cloned()
    }

    /// Ports that currently have at least one lock registered.
    pub fn ports(&self) -> Vec<u16> {
        self.ports.keys().copied().collect()
    }

    /// Total number of registered locks across all ports.
    pub fn len(&self) -> usize {
        self.ports.values().map(HashMap::len).sum()
    }

    /// Whether the registry holds no locks at all.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
