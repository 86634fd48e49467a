//! Network infrastructure for the unlock server.
//!
//! # Sub-modules
//!
//! - **`unlock_router`** – One instance per running port: accepts inbound
//!   connections, delegates the handshake to the protocol boundary, and
//!   routes verified pairings to the matching lock entity through the
//!   accept/reject observer pair.
//!
//! - **`server_manager`** – Owns one router task per active port and
//!   replaces it wholesale whenever lock membership for that port changes.

pub mod server_manager;
pub mod unlock_router;
