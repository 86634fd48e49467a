//! Boundary to the external PC Bio Unlock protocol library.
//!
//! The pairing handshake, its framing, and the encryption key exchange are
//! owned by the external library. The server layer only needs two
//! capabilities from it, captured by the [`UnlockProtocol`] trait:
//!
//! 1. **Authenticate** an accepted inbound connection against a fixed set of
//!    candidate pairings, recovering the verified pairing identity.
//! 2. **Perform the remote unlock** round trip against a desktop, using the
//!    credentials stored in its [`LockRecord`].
//!
//! Both operations suspend on network I/O and must be driven from a Tokio
//! task. Implementations never log credential bytes; the error types below
//! carry only peer addresses and human-readable reasons.
//!
//! The production implementation wraps the PCBU wire protocol; tests use
//! [`mock::MockUnlockProtocol`].

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::domain::lock_record::{LockRecord, PairingId};

pub mod mock;

/// The identity recovered after successful authentication of an inbound
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPairing {
    /// The pairing the peer proved ownership of.
    pub pairing_id: PairingId,
    /// The peer's network address, for logging on the accept path.
    pub peer_addr: SocketAddr,
}

/// Error type for handshake authentication.
///
/// `Rejected` is an expected, non-exceptional outcome: unauthenticated peers
/// probing the port land here and are routed to the reject hook.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The handshake completed but verification failed.
    #[error("handshake from {peer} rejected: {reason}")]
    Rejected { peer: SocketAddr, reason: String },
    /// The connection dropped or errored mid-handshake.
    #[error("connection error during handshake with {peer}: {source}")]
    Io {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl AuthError {
    /// The peer address the failure is attributed to.
    pub fn peer(&self) -> SocketAddr {
        match self {
            AuthError::Rejected { peer, .. } | AuthError::Io { peer, .. } => *peer,
        }
    }
}

/// Error type for the remote-unlock round trip.
#[derive(Debug, Error)]
pub enum RemoteUnlockError {
    /// The desktop did not answer within the protocol timeout.
    #[error("remote desktop did not answer within the protocol timeout")]
    Timeout,
    /// The desktop answered but refused the unlock request.
    #[error("remote desktop rejected the unlock request: {0}")]
    Rejected(String),
    /// Transport failure before a response was received.
    #[error("transport error during remote unlock: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait abstracting the external protocol library.
///
/// The server layer passes credentials through this seam without
/// interpreting their bytes. Implementations own the entire wire format.
#[async_trait]
pub trait UnlockProtocol: Send + Sync {
    /// Runs the authentication handshake on an accepted connection.
    ///
    /// `candidates` is the fixed set of pairings the listener was built
    /// over; the library verifies the peer against exactly that set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] when verification fails and
    /// [`AuthError::Io`] when the connection drops mid-handshake.
    async fn authenticate(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        candidates: &[LockRecord],
    ) -> Result<VerifiedPairing, AuthError>;

    /// Asks the desktop described by `record` to unlock itself over an
    /// authenticated channel.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteUnlockError`] on timeout, refusal, or transport
    /// failure. No retry is attempted at this layer.
    async fn perform_remote_unlock(&self, record: &LockRecord) -> Result<(), RemoteUnlockError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
