//! Infrastructure layer for the unlock server.
//!
//! Contains the runtime-facing adapters: listening sockets and their
//! lifecycle, the development protocol implementation, configuration
//! persistence, and the entity-framework bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `pcbu_core`, but MUST NOT be imported by the `application` layer.

pub mod entity_bridge;
pub mod network;
pub mod protocol;
pub mod storage;
