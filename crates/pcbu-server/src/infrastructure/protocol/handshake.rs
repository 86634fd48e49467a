//! Plaintext development handshake.
//!
//! A line-oriented stand-in for the external PCBU protocol library: the peer
//! sends its pairing id terminated by `\n`, the server answers `OK` or
//! `ERR`. The remote-unlock round trip mirrors it — connect to the desktop's
//! unlock port, send `UNLOCK <pairing_id>`, expect `OK`.
//!
//! This exists so the binary and the integration tests have a concrete
//! [`UnlockProtocol`] to wire; it performs no cryptography and must not be
//! exposed outside a trusted network.
//!
//! TODO: replace with the encrypted PCBU handshake once the protocol crate
//! is published.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use pcbu_core::{AuthError, LockRecord, RemoteUnlockError, UnlockProtocol, VerifiedPairing};

/// Mirrors the 10-second socket timeout the desktop app uses.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Line-oriented plaintext implementation of [`UnlockProtocol`].
pub struct PlaintextHandshake {
    /// Port on the *desktop* that answers unlock requests.
    desktop_unlock_port: u16,
}

/// Default port the PC Bio Unlock desktop app listens on for unlock
/// requests (the pairing QR advertises it).
pub const DEFAULT_DESKTOP_UNLOCK_PORT: u16 = 43295;

impl PlaintextHandshake {
    pub fn new(desktop_unlock_port: u16) -> Self {
        Self {
            desktop_unlock_port,
        }
    }
}

impl Default for PlaintextHandshake {
    fn default() -> Self {
        Self::new(DEFAULT_DESKTOP_UNLOCK_PORT)
    }
}

#[async_trait]
impl UnlockProtocol for PlaintextHandshake {
    async fn authenticate(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        candidates: &[LockRecord],
    ) -> Result<VerifiedPairing, AuthError> {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();

        let read = timeout(SOCKET_TIMEOUT, stream.read_line(&mut line)).await;
        match read {
            Ok(Ok(0)) => {
                return Err(AuthError::Io {
                    peer,
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed before handshake",
                    ),
                })
            }
            Ok(Ok(_)) => {}
            Ok(Err(source)) => return Err(AuthError::Io { peer, source }),
            Err(_) => {
                return Err(AuthError::Io {
                    peer,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "handshake timed out",
                    ),
                })
            }
        }

        let claimed = line.trim();
        let matched = candidates.iter().find(|r| r.pairing_id == claimed);

        match matched {
            Some(record) => {
                let pairing_id = record.pairing_id.clone();
                // Best effort: the verdict line is advisory for the peer.
                let _ = stream.get_mut().write_all(b"OK\n").await;
                Ok(VerifiedPairing {
                    pairing_id,
                    peer_addr: peer,
                })
            }
            None => {
                let _ = stream.get_mut().write_all(b"ERR\n").await;
                Err(AuthError::Rejected {
                    peer,
                    reason: "unknown pairing id".to_string(),
                })
            }
        }
    }

    async fn perform_remote_unlock(&self, record: &LockRecord) -> Result<(), RemoteUnlockError> {
        let addr = SocketAddr::new(record.desktop_addr, self.desktop_unlock_port);

        let stream = timeout(SOCKET_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RemoteUnlockError::Timeout)??;
        let mut stream = BufReader::new(stream);

        let request = format!("UNLOCK {}\n", record.pairing_id);
        timeout(SOCKET_TIMEOUT, stream.get_mut().write_all(request.as_bytes()))
            .await
            .map_err(|_| RemoteUnlockError::Timeout)??;

        let mut reply = String::new();
        timeout(SOCKET_TIMEOUT, stream.read_line(&mut reply))
            .await
            .map_err(|_| RemoteUnlockError::Timeout)??;

        if reply.trim() == "OK" {
            Ok(())
        } else {
            Err(RemoteUnlockError::Rejected(reply.trim().to_string()))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pcbu_core::{PairingCredentials, RemoteInfo};
    use tokio::net::TcpListener;

    fn make_record(pairing_id: &str, addr: &str) -> LockRecord {
        LockRecord {
            pairing_id: pairing_id.to_string(),
            desktop_addr: addr.parse().unwrap(),
            server_port: 0,
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

    /// Accepts one connection and returns both ends for a handshake test.
    async fn stream_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    #[tokio::test]
    async fn test_authenticate_accepts_known_pairing_id() {
        // Arrange
        let (mut client, server, peer) = stream_pair().await;
        let handshake = PlaintextHandshake::default();
        let candidates = vec![make_record("p1", "127.0.0.1")];

        // Act – peer announces a known pairing id
        client.write_all(b"p1\n").await.unwrap();
        let verified = handshake
            .authenticate(server, peer, &candidates)
            .await
            .expect("handshake must verify");

        // Assert
        assert_eq!(verified.pairing_id, "p1");
        assert_eq!(verified.peer_addr, peer);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_unknown_pairing_id() {
        let (mut client, server, peer) = stream_pair().await;
        let handshake = PlaintextHandshake::default();
        let candidates = vec![make_record("p1", "127.0.0.1")];

        client.write_all(b"intruder\n").await.unwrap();
        let result = handshake.authenticate(server, peer, &candidates).await;

        assert!(matches!(result, Err(AuthError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_authenticate_maps_early_close_to_io_error() {
        let (client, server, peer) = stream_pair().await;
        let handshake = PlaintextHandshake::default();
        let candidates = vec![make_record("p1", "127.0.0.1")];

        drop(client); // peer disappears before speaking
        let result = handshake.authenticate(server, peer, &candidates).await;

        assert!(matches!(result, Err(AuthError::Io { .. })));
    }

    #[tokio::test]
    async fn test_remote_unlock_round_trip_against_fake_desktop() {
        // Arrange – a fake desktop that acknowledges one UNLOCK request
        let desktop = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = desktop.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = desktop.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("UNLOCK "));
            stream.get_mut().write_all(b"OK\n").await.unwrap();
        });
        let handshake = PlaintextHandshake::new(port);

        // Act / Assert
        handshake
            .perform_remote_unlock(&make_record("p1", "127.0.0.1"))
            .await
            .expect("unlock must succeed");
    }

    #[tokio::test]
    async fn test_remote_unlock_maps_refusal_to_rejected() {
        let desktop = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = desktop.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = desktop.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            stream.get_mut().write_all(b"DENIED\n").await.unwrap();
        });
        let handshake = PlaintextHandshake::new(port);

        let result = handshake
            .perform_remote_unlock(&make_record("p1", "127.0.0.1"))
            .await;

        assert!(matches!(result, Err(RemoteUnlockError::Rejected(r)) if r == "DENIED"));
    }

    #[tokio::test]
    async fn test_remote_unlock_fails_when_desktop_is_down() {
        // Probe a port and free it so the connect is refused.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let handshake = PlaintextHandshake::new(port);

        let result = handshake
            .perform_remote_unlock(&make_record("p1", "127.0.0.1"))
            .await;

        assert!(matches!(result, Err(RemoteUnlockError::Io(_))));
    }
}
