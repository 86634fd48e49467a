//! Domain value types for the PCBU unlock server.
//!
//! This module contains pure data with no infrastructure dependencies: it can
//! be compiled and tested on any platform without sockets or a runtime.

/// Paired-desktop description — the core domain record.
///
/// See [`lock_record::LockRecord`] for the main type.
pub mod lock_record;
