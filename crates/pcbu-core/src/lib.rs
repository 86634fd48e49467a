//! # pcbu-core
//!
//! Shared library for the PCBU unlock server containing the domain value
//! types and the boundary to the external PC Bio Unlock protocol library.
//!
//! This crate is used by the server binary and by integration tests.
//! It opens no sockets of its own; the only network type it mentions is the
//! `tokio::net::TcpStream` handed across the protocol boundary.
//!
//! # What lives here
//!
//! - **`domain`** – Pure value types describing one paired desktop: the
//!   [`LockRecord`] with its pairing identity, network coordinates, opaque
//!   credentials, and display metadata.
//!
//! - **`protocol`** – The [`UnlockProtocol`] trait. The pairing handshake and
//!   the authenticated remote-unlock round trip are owned by the external
//!   protocol library; this crate only defines the shape of that seam so the
//!   server can be wired against a production implementation or a test
//!   double.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `pcbu_core::LockRecord` instead of the full module path.
pub use domain::lock_record::{LockRecord, PairingCredentials, PairingId, RemoteInfo};
pub use protocol::{AuthError, RemoteUnlockError, UnlockProtocol, VerifiedPairing};
