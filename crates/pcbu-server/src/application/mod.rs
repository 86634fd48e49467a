//! Application layer for the unlock server.
//!
//! Code here orchestrates domain objects and depends on abstractions only:
//! no sockets, no file system, no runtime handles. Infrastructure
//! implementations are injected at construction time, which keeps both
//! sub-modules fully unit-testable.
//!
//! # Sub-modules
//!
//! - **`lock`** – The per-desktop lock entity: the Idle/Pending availability
//!   state machine, the rebindable unlock channel, and the "write state"
//!   hook through which every transition is surfaced to the surrounding
//!   entity framework.
//!
//! - **`lock_registry`** – Pure bookkeeping of which locks share which
//!   listening port. The registry's per-port snapshot is the authoritative
//!   input to every listener the server runs.

pub mod lock;
pub mod lock_registry;
