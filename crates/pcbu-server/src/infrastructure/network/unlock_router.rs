//! UnlockRequestRouter: per-port listener that routes verified unlock
//! requests to the right lock.
//!
//! A router is built over an immutable snapshot of the locks registered for
//! one port at construction time. It never learns about membership changes:
//! the lifecycle manager replaces the whole router instead, which keeps the
//! listener's view of its lock set and the registry's view trivially
//! consistent.
//!
//! # Connection handling
//!
//! The accept loop never blocks on a handshake: every accepted connection is
//! spawned onto a [`JoinSet`] and authenticated concurrently. One failed or
//! slow connection cannot stall acceptance of the next. Because the
//! `JoinSet` is owned by the router task, aborting that task drops the set
//! and aborts every in-flight handshake with it — cancellation of a port is
//! abrupt by design, and the bound socket is released when the listener is
//! dropped on the same exit path.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use pcbu_core::{
    AuthError, LockRecord, PairingId, RemoteUnlockError, UnlockProtocol, VerifiedPairing,
};

use crate::application::lock::{Lock, UnlockChannel};

/// Error type for router construction and routing.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The listening socket could not be bound (e.g. the port is already in
    /// use by another process). Fatal for the refresh that requested it.
    #[error("failed to bind unlock listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The protocol library verified an identity that matches no lock bound
    /// to this listener. A defensive check; not expected in steady state.
    #[error("verified pairing {pairing_id} does not match any lock on this listener")]
    UnmatchedPairing { pairing_id: PairingId },
}

/// Observer pair for the router's two per-connection outcomes.
///
/// Supplied at construction; [`LoggingRouterEvents`] is the production
/// implementation, tests substitute recording doubles.
pub trait RouterEvents: Send + Sync {
    /// A verified unlock request arrived for `lock`.
    fn on_valid_unlock_request(&self, lock: &Arc<Lock>, peer: SocketAddr);
    /// A connection from `peer` failed handshake verification.
    fn on_invalid_unlock_request(&self, peer: SocketAddr);
}

/// Production observer: logs the outcome and drives the lock state machine.
pub struct LoggingRouterEvents;

impl RouterEvents for LoggingRouterEvents {
    fn on_valid_unlock_request(&self, lock: &Arc<Lock>, peer: SocketAddr) {
        info!(%peer, pairing_id = %lock.unique_id(), "accepted unlock request");
        lock.mark_unlock_pending();
    }

    fn on_invalid_unlock_request(&self, peer: SocketAddr) {
        info!(%peer, "rejected unlock request");
    }
}

/// The authoritative unlock callback for one router instance.
///
/// Owned (via `Arc`) by the [`ServerRuntime`] holding the router task;
/// locks only hold a weak reference, so retiring the runtime invalidates
/// every binding that pointed at it.
///
/// [`ServerRuntime`]: super::server_manager::ServerRuntime
struct RouterUnlockChannel {
    protocol: Arc<dyn UnlockProtocol>,
}

#[async_trait]
impl UnlockChannel for RouterUnlockChannel {
    async fn remote_unlock(&self, record: &LockRecord) -> Result<(), RemoteUnlockError> {
        self.protocol.perform_remote_unlock(record).await
    }
}

/// State shared between the accept loop and its connection handlers.
struct RouterInner {
    /// Candidate records handed to the protocol library on every handshake.
    records: Vec<LockRecord>,
    /// Routing table: verified pairing id → lock.
    locks_by_id: HashMap<PairingId, Arc<Lock>>,
    protocol: Arc<dyn UnlockProtocol>,
    events: Arc<dyn RouterEvents>,
}

impl RouterInner {
    /// Resolves a verified pairing to the lock it belongs to.
    fn resolve(&self, verified: &VerifiedPairing) -> Result<Arc<Lock>, RouterError> {
        self.locks_by_id
            .get(&verified.pairing_id)
            .cloned()
            .ok_or_else(|| RouterError::UnmatchedPairing {
                pairing_id: verified.pairing_id.clone(),
            })
    }
}

/// A single-port unlock listener bound over a fixed set of locks.
pub struct UnlockRouter {
    listener: TcpListener,
    local_addr: SocketAddr,
    inner: Arc<RouterInner>,
    channel: Arc<dyn UnlockChannel>,
}

impl UnlockRouter {
    /// Binds the listening socket and prepares the routing table.
    ///
    /// Binding happens here — before the router is spawned — so that a port
    /// conflict surfaces synchronously to the caller of the refresh instead
    /// of dying inside a background task.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Bind`] if the socket cannot be bound.
    pub async fn bind(
        bind_addr: IpAddr,
        port: u16,
        locks: &[Arc<Lock>],
        protocol: Arc<dyn UnlockProtocol>,
        events: Arc<dyn RouterEvents>,
    ) -> Result<Self, RouterError> {
        let addr = SocketAddr::new(bind_addr, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RouterError::Bind { addr, source })?;
        // With port 0 the OS picks; report the address actually bound.
        let local_addr = listener.local_addr().unwrap_or(addr);

        let records: Vec<LockRecord> = locks.iter().map(|l| l.record().clone()).collect();
        let locks_by_id: HashMap<PairingId, Arc<Lock>> = locks
            .iter()
            .map(|l| (l.unique_id().clone(), Arc::clone(l)))
            .collect();

        let channel: Arc<dyn UnlockChannel> = Arc::new(RouterUnlockChannel {
            protocol: Arc::clone(&protocol),
        });

        Ok(Self {
            listener,
            local_addr,
            inner: Arc::new(RouterInner {
                records,
                locks_by_id,
                protocol,
                events,
            }),
            channel,
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The unlock channel locks on this port must be bound to.
    pub fn unlock_channel(&self) -> Arc<dyn UnlockChannel> {
        Arc::clone(&self.channel)
    }

    /// Resolves a verified pairing against this router's lock set.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnmatchedPairing`] if the identity matches no
    /// lock bound to this listener.
    pub fn resolve(&self, verified: &VerifiedPairing) -> Result<Arc<Lock>, RouterError> {
        self.inner.resolve(verified)
    }

    /// The background task body: accepts and authenticates connections
    /// until the task is cancelled.
    pub async fn run(self) {
        info!(
            addr = %self.local_addr,
            locks = self.inner.locks_by_id.len(),
            "unlock listener started"
        );

        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "inbound unlock connection");
                        let inner = Arc::clone(&self.inner);
                        handshakes.spawn(handle_connection(inner, stream, peer));
                    }
                    // Per-connection accept failures are transient; the
                    // listener itself stays up.
                    Err(e) => warn!(addr = %self.local_addr, "accept failed: {e}"),
                },
                Some(result) = handshakes.join_next(), if !handshakes.is_empty() => {
                    if let Err(e) = result {
                        if !e.is_cancelled() {
                            error!("unlock connection handler panicked: {e}");
                        }
                    }
                }
            }
        }
    }
}

/// Authenticates one accepted connection and dispatches the outcome.
async fn handle_connection(inner: Arc<RouterInner>, stream: TcpStream, peer: SocketAddr) {
    match inner.protocol.authenticate(stream, peer, &inner.records).await {
        Ok(verified) => match inner.resolve(&verified) {
            Ok(lock) => inner.events.on_valid_unlock_request(&lock, verified.peer_addr),
            Err(e) => {
                warn!(%peer, "{e}");
                inner.events.on_invalid_unlock_request(peer);
            }
        },
        Err(e @ AuthError::Rejected { .. }) => {
            debug!("{e}");
            inner.events.on_invalid_unlock_request(peer);
        }
        // Transport failure mid-handshake: isolated to this connection, no
        // hook fires and no lock changes state.
        Err(e @ AuthError::Io { .. }) => debug!("{e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
