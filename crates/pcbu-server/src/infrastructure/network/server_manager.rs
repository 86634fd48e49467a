//! ServerLifecycleManager: one running unlock listener per active port.
//!
//! The manager owns the [`LockRegistry`] and a map of [`ServerRuntime`]s.
//! Every registry mutation triggers a *refresh* of the affected port: the
//! old runtime (if any) is fully retired — task aborted, socket released —
//! and, if the port still has locks, a fresh [`UnlockRouter`] is built over
//! the registry's current snapshot and spawned as a new background task.
//!
//! Replacement is whole-set, never incremental: a running router's lock set
//! is immutable, so the router's view and the registry's view can never
//! drift apart. The restart cost (a brief listening gap on that port) is
//! paid only on pairing and unpairing events.
//!
//! # Serialization
//!
//! Methods take `&mut self`; the caller owns the manager behind a
//! `tokio::sync::Mutex` (see the entity bridge), which serializes
//! mutations and upholds the at-most-one-runtime-per-port invariant.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pcbu_core::UnlockProtocol;

use crate::application::lock::{Lock, UnlockChannel};
use crate::application::lock_registry::{LockRegistry, RegistryError};

use super::unlock_router::{LoggingRouterEvents, RouterError, RouterEvents, UnlockRouter};

/// Error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The registry rejected the mutation (e.g. removing an unknown lock).
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The replacement listener could not be built. The port is left with
    /// no runtime — deliberately offline rather than inconsistent.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Handle to the one running listener for a port.
pub struct ServerRuntime {
    local_addr: SocketAddr,
    /// Keeps the router's unlock channel alive; dropping the runtime kills
    /// every weak binding that points at it.
    channel: Arc<dyn UnlockChannel>,
    task: JoinHandle<()>,
}

impl ServerRuntime {
    /// The address the runtime's listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancels the router task and waits for it to wind down, which drops
    /// the listener (releasing the socket) and aborts in-flight handshakes.
    async fn retire(self) {
        self.task.abort();
        // Await the aborted handle so the socket is provably released
        // before a replacement tries to bind the same port.
        let _ = self.task.await;
        debug!(addr = %self.local_addr, "unlock listener retired");
        drop(self.channel);
    }
}

/// The port-multiplexed unlock server manager.
pub struct UnlockServerManager {
    bind_addr: IpAddr,
    registry: LockRegistry,
    runtimes: HashMap<u16, ServerRuntime>,
    protocol: Arc<dyn UnlockProtocol>,
    events: Arc<dyn RouterEvents>,
}

impl UnlockServerManager {
    /// Creates a manager with the production accept/reject observer.
    pub fn new(bind_addr: IpAddr, protocol: Arc<dyn UnlockProtocol>) -> Self {
        Self::with_events(bind_addr, protocol, Arc::new(LoggingRouterEvents))
    }

    /// Creates a manager with a caller-supplied observer (used by tests).
    pub fn with_events(
        bind_addr: IpAddr,
        protocol: Arc<dyn UnlockProtocol>,
        events: Arc<dyn RouterEvents>,
    ) -> Self {
        Self {
            bind_addr,
            registry: LockRegistry::new(),
            runtimes: HashMap::new(),
            protocol,
            events,
        }
    }

    /// Registers `lock` and refreshes the listener for its port.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Router`] if the replacement listener cannot
    /// bind; the lock stays registered but the port is left offline.
    pub async fn add_lock(&mut self, lock: Arc<Lock>) -> Result<(), ManagerError> {
        let port = lock.port();
        info!(port, pairing_id = %lock.unique_id(), "registering lock");
        self.registry.add(lock);
        self.refresh(port).await
    }

    /// Unregisters the lock for `(port, desktop_addr)` and refreshes the
    /// port's listener.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Registry`] if no such lock is registered, and
    /// [`ManagerError::Router`] if the shrunken replacement cannot bind.
    pub async fn remove_lock(
        &mut self,
        port: u16,
        desktop_addr: IpAddr,
    ) -> Result<Arc<Lock>, ManagerError> {
        let removed = self.registry.remove(port, desktop_addr)?;
        info!(port, pairing_id = %removed.unique_id(), "unregistering lock");
        self.refresh(port).await?;
        Ok(removed)
    }

    /// Replaces the listener for `port` with one built over the registry's
    /// current snapshot.
    ///
    /// 1. An existing runtime is retired first — cancel, await, release.
    /// 2. If the port still has locks, a new router is bound, every lock in
    ///    the snapshot is re-bound to the new router's unlock channel, and
    ///    the router is spawned as the port's new runtime.
    /// 3. If the snapshot is empty, the port is left with no runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Router`] on bind failure. No rollback to the
    /// retired runtime is attempted: the port stays offline and the error
    /// surfaces to the caller of the add/remove operation.
    pub async fn refresh(&mut self, port: u16) -> Result<(), ManagerError> {
        if let Some(previous) = self.runtimes.remove(&port) {
            previous.retire().await;
        }

        let locks = self.registry.locks_for_port(port);
        if locks.is_empty() {
            debug!(port, "no locks remain; port left without a listener");
            return Ok(());
        }

        let router = UnlockRouter::bind(
            self.bind_addr,
            port,
            &locks,
            Arc::clone(&self.protocol),
            Arc::clone(&self.events),
        )
        .await?;

        let channel = router.unlock_channel();
        for lock in &locks {
            lock.bind_channel(&channel);
        }

        let local_addr = router.local_addr();
        let task = tokio::spawn(router.run());
        self.runtimes.insert(
            port,
            ServerRuntime {
                local_addr,
                channel,
                task,
            },
        );
        info!(port, %local_addr, locks = locks.len(), "unlock listener replaced");
        Ok(())
    }

    /// Retires every runtime. Called on integration teardown.
    pub async fn shutdown(&mut self) {
        let ports: Vec<u16> = self.runtimes.keys().copied().collect();
        for port in ports {
            if let Some(runtime) = self.runtimes.remove(&port) {
                runtime.retire().await;
            }
        }
        info!("all unlock listeners retired");
    }

    /// Read access to the registry (entity bridge queries).
    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    /// Whether a runtime is currently installed for `port`.
    pub fn has_runtime(&self, port: u16) -> bool {
        self.runtimes.contains_key(&port)
    }

    /// The bound address of the runtime for `port`, if one is installed.
    pub fn runtime_addr(&self, port: u16) -> Option<SocketAddr> {
        self.runtimes.get(&port).map(ServerRuntime::local_addr)
    }

    /// Number of installed runtimes (at most one per active port).
    pub fn runtime_count(&self) -> usize {
        self.runtimes.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::lock::NullStateSink;
    use pcbu_core::protocol::mock::MockUnlockProtocol;
    use pcbu_core::{LockRecord, PairingCredentials, RemoteInfo};
    use tokio::net::TcpListener;

    fn make_lock(pairing_id: &str, addr: &str, port: u16) -> Arc<Lock> {
        let record = LockRecord {
            pairing_id: pairing_id.to_string(),
            desktop_addr: addr.parse().unwrap(),
            server_port: port,
            credentials: PairingCredentials {
                username: "u".to_string(),
                password: "p".to_string(),
                encryption_key: "k".to_string(),
            },
            remote_info: RemoteInfo {
                name: format!("pc-{pairing_id}"),
                mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
                os: "Linux".to_string(),
            },
        };
        Arc::new(Lock::new(record, Arc::new(NullStateSink)))
    }

    fn make_manager() -> UnlockServerManager {
        UnlockServerManager::new(
            "127.0.0.1".parse().unwrap(),
            Arc::new(MockUnlockProtocol::new()),
        )
    }

    /// Reserves a free TCP port by probing an OS-assigned bind.
    async fn free_port() -> u16 {
        let probe = TcpListener::bind("127.0.0.1:0").await.expect("probe bind");
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        port
    }

    #[tokio::test]
    async fn test_add_lock_installs_one_runtime_for_the_port() {
        // Arrange
        let mut mgr = make_manager();
        let port = free_port().await;

        // Act
        mgr.add_lock(make_lock("p1", "192.168.1.10", port))
            .await
            .expect("add must succeed");

        // Assert
        assert_eq!(mgr.runtime_count(), 1);
        assert!(mgr.has_runtime(port));
        assert_eq!(mgr.runtime_addr(port).unwrap().port(), port);

        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_lock_on_same_port_keeps_exactly_one_runtime() {
        let mut mgr = make_manager();
        let port = free_port().await;

        mgr.add_lock(make_lock("p1", "192.168.1.10", port)).await.unwrap();
        mgr.add_lock(make_lock("p2", "192.168.1.11", port)).await.unwrap();

        assert_eq!(mgr.runtime_count(), 1);
        assert_eq!(mgr.registry().locks_for_port(port).len(), 2);

        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn test_locks_on_different_ports_get_independent_runtimes() {
        let mut mgr = make_manager();
        let port_a = free_port().await;
        let port_b = free_port().await;

        mgr.add_lock(make_lock("p1", "192.168.1.10", port_a)).await.unwrap();
        mgr.add_lock(make_lock("p2", "192.168.1.11", port_b)).await.unwrap();

        assert_eq!(mgr.runtime_count(), 2);
        assert!(mgr.has_runtime(port_a));
        assert!(mgr.has_runtime(port_b));

        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn test_removing_last_lock_leaves_port_without_runtime() {
        let mut mgr = make_manager();
        let port = free_port().await;
        mgr.add_lock(make_lock("p1", "192.168.1.10", port)).await.unwrap();

        mgr.remove_lock(port, "192.168.1.10".parse().unwrap())
            .await
            .expect("remove must succeed");

        assert_eq!(mgr.runtime_count(), 0);
        assert!(!mgr.has_runtime(port));
    }

    #[tokio::test]
    async fn test_remove_unknown_lock_surfaces_registry_error() {
        let mut mgr = make_manager();
        let result = mgr.remove_lock(9000, "192.168.1.10".parse().unwrap()).await;
        assert!(matches!(result, Err(ManagerError::Registry(_))));
    }

    #[tokio::test]
    async fn test_bind_conflict_surfaces_error_and_leaves_port_offline() {
        // Arrange – occupy the port with a foreign listener
        let squatter = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = squatter.local_addr().unwrap().port();
        let mut mgr = make_manager();

        // Act
        let result = mgr.add_lock(make_lock("p1", "192.168.1.10", port)).await;

        // Assert – error surfaced, no runtime recorded, lock stays registered
        assert!(matches!(result, Err(ManagerError::Router(_))));
        assert!(!mgr.has_runtime(port));
        assert_eq!(mgr.registry().locks_for_port(port).len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_retires_every_runtime() {
        let mut mgr = make_manager();
        let port_a = free_port().await;
        let port_b = free_port().await;
        mgr.add_lock(make_lock("p1", "192.168.1.10", port_a)).await.unwrap();
        mgr.add_lock(make_lock("p2", "192.168.1.11", port_b)).await.unwrap();

        mgr.shutdown().await;

        assert_eq!(mgr.runtime_count(), 0);
    }
}
