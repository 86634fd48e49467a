//! Protocol implementations satisfying the `pcbu_core::UnlockProtocol`
//! boundary.
//!
//! The production handshake (AES-encrypted PCBU wire format) belongs to the
//! external protocol library; until that integration lands, `handshake`
//! provides a plaintext development implementation with the same shape.

pub mod handshake;
