//! Mock protocol implementation for unit and integration testing.
//!
//! Allows tests to script authentication outcomes without speaking any wire
//! protocol: the accepted stream is dropped unread and the configured verdict
//! is returned immediately. Remote-unlock calls are recorded so tests can
//! assert exactly how often and for which pairing they happened.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::domain::lock_record::{LockRecord, PairingId};

use super::{AuthError, RemoteUnlockError, UnlockProtocol, VerifiedPairing};

/// A scripted [`UnlockProtocol`] implementation.
///
/// Default behavior rejects every handshake and accepts every remote unlock.
pub struct MockUnlockProtocol {
    /// When `Some(id)`, every handshake verifies as that pairing id —
    /// regardless of the candidate set, which lets tests exercise the
    /// router's unmatched-pairing check.
    verify_as: Mutex<Option<PairingId>>,
    /// Pairing ids for which `perform_remote_unlock` was invoked, in order.
    unlock_calls: Mutex<Vec<PairingId>>,
    /// When set, the next remote unlock fails with a timeout.
    fail_next_unlock: AtomicBool,
}

impl MockUnlockProtocol {
    /// Creates a mock that rejects all handshakes.
    pub fn new() -> Self {
        Self {
            verify_as: Mutex::new(None),
            unlock_calls: Mutex::new(Vec::new()),
            fail_next_unlock: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent handshake verify as `pairing_id`.
    pub fn accept_as(&self, pairing_id: impl Into<PairingId>) {
        *self.verify_as.lock().expect("lock poisoned") = Some(pairing_id.into());
    }

    /// Makes every subsequent handshake fail verification.
    pub fn reject_all(&self) {
        *self.verify_as.lock().expect("lock poisoned") = None;
    }

    /// Makes the next `perform_remote_unlock` call fail with a timeout.
    pub fn fail_next_unlock(&self) {
        self.fail_next_unlock.store(true, Ordering::SeqCst);
    }

    /// Returns the pairing ids remote unlock was performed for, in order.
    pub fn unlock_calls(&self) -> Vec<PairingId> {
        self.unlock_calls.lock().expect("lock poisoned").clone()
    }
}

impl Default for MockUnlockProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnlockProtocol for MockUnlockProtocol {
    async fn authenticate(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        _candidates: &[LockRecord],
    ) -> Result<VerifiedPairing, AuthError> {
        // The mock never reads the stream; dropping it closes the connection.
        drop(stream);
        match self.verify_as.lock().expect("lock poisoned").clone() {
            Some(pairing_id) => Ok(VerifiedPairing {
                pairing_id,
                peer_addr: peer,
            }),
            None => Err(AuthError::Rejected {
                peer,
                reason: "mock configured to reject".to_string(),
            }),
        }
    }

    async fn perform_remote_unlock(&self, record: &LockRecord) -> Result<(), RemoteUnlockError> {
        self.unlock_calls
            .lock()
            .expect("lock poisoned")
            .push(record.pairing_id.clone());
        if self.fail_next_unlock.swap(false, Ordering::SeqCst) {
            return Err(RemoteUnlockError::Timeout);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lock_record::{PairingCredentials, RemoteInfo};

    fn make_record(pairing_id: &str) -> LockRecord {
        LockRecord {
            pairing_id: pairing_id.to_string(),
            desktop_addr: "127.0.0.1".parse().unwrap(),
            server_port: 43296,
            credentials: PairingCredentials {
                username: "u".to_string(),
                password: "p".to_string(),
                encryption_key: "k".to_string(),
            },
            remote_info: RemoteInfo {
                name: "pc".to_string(),
                mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
                os: "Linux".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_records_unlock_calls_in_order() {
        // Arrange
        let mock = MockUnlockProtocol::new();

        // Act
        mock.perform_remote_unlock(&make_record("p1")).await.unwrap();
        mock.perform_remote_unlock(&make_record("p2")).await.unwrap();

        // Assert
        assert_eq!(mock.unlock_calls(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_next_unlock_fails_exactly_once() {
        let mock = MockUnlockProtocol::new();
        mock.fail_next_unlock();

        let first = mock.perform_remote_unlock(&make_record("p1")).await;
        let second = mock.perform_remote_unlock(&make_record("p1")).await;

        assert!(matches!(first, Err(RemoteUnlockError::Timeout)));
        assert!(second.is_ok());
    }
}
