//! The [`LockRecord`] and its component value types.
//!
//! A `LockRecord` is created once — when a pairing completes or when persisted
//! configuration is loaded at startup — and never mutated afterwards. In
//! particular `server_port` is fixed for the record's lifetime: moving a lock
//! to a different port means removing it and re-adding a fresh record.
//!
//! # Credential handling
//!
//! The username/password/encryption-key trio is opaque to this layer: it is
//! passed through to the external protocol library without interpretation.
//! [`PairingCredentials`] has a hand-written `Debug` impl that redacts every
//! field, so a `LockRecord` can be logged at any level without leaking
//! secrets.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Opaque unique identifier issued by the remote desktop at pairing time.
///
/// Stable for the lifetime of a pairing; used as the routing key and as the
/// lock entity's unique id. The bytes are meaningful only to the external
/// protocol library.
pub type PairingId = String;

/// Display metadata about the paired remote desktop.
///
/// Used only for presentation (entity naming, diagnostics) — never for
/// routing decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInfo {
    /// Host name the desktop reported during pairing.
    pub name: String,
    /// MAC address of the desktop's primary interface.
    pub mac_address: String,
    /// Operating system string the desktop reported.
    pub os: String,
}

/// Opaque secrets handed to the external protocol library.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCredentials {
    /// Account name on the remote desktop.
    pub username: String,
    /// Account password, stored as received from the pairing response.
    pub password: String,
    /// Symmetric key established during the pairing handshake.
    pub encryption_key: String,
}

impl std::fmt::Debug for PairingCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingCredentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

/// Immutable description of one paired desktop.
///
/// One record corresponds to one completed pairing. Several records may share
/// a `server_port`; the server layer groups them into per-port buckets and
/// runs one listener per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Primary key for routing; see [`PairingId`].
    pub pairing_id: PairingId,
    /// Address of the paired desktop. Unique within a port bucket — a later
    /// registration for the same address replaces the earlier one.
    pub desktop_addr: IpAddr,
    /// TCP port the unlock listener for this lock runs on.
    pub server_port: u16,
    /// Opaque secrets for the external protocol library.
    pub credentials: PairingCredentials,
    /// Presentation-only metadata.
    pub remote_info: RemoteInfo,
}

impl LockRecord {
    /// Returns the display name for this lock (the remote host name).
    pub fn name(&self) -> &str {
        &self.remote_info.name
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(pairing_id: &str, addr: &str, port: u16) -> LockRecord {
        LockRecord {
            pairing_id: pairing_id.to_string(),
            desktop_addr: addr.parse().expect("test address must parse"),
            server_port: port,
            credentials: PairingCredentials {
                username: "alice".to_string(),
                password: "hunter2".to_string(),
                encryption_key: "0123456789abcdef".to_string(),
            },
            remote_info: RemoteInfo {
                name: "office-pc".to_string(),
                mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
                os: "Windows 11".to_string(),
            },
        }
    }

    #[test]
    fn test_debug_output_redacts_credentials() {
        // Arrange
        let record = make_record("p1", "192.168.1.100", 43296);

        // Act
        let debug = format!("{record:?}");

        // Assert – secret values must never appear in Debug output
        assert!(!debug.contains("hunter2"), "password leaked: {debug}");
        assert!(!debug.contains("0123456789abcdef"), "key leaked: {debug}");
        assert!(!debug.contains("alice"), "username leaked: {debug}");
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_debug_output_keeps_non_secret_fields() {
        let record = make_record("p1", "192.168.1.100", 43296);
        let debug = format!("{record:?}");
        assert!(debug.contains("p1"));
        assert!(debug.contains("office-pc"));
    }

    #[test]
    fn test_name_returns_remote_host_name() {
        let record = make_record("p1", "192.168.1.100", 43296);
        assert_eq!(record.name(), "office-pc");
    }

    #[test]
    fn test_records_with_same_fields_compare_equal() {
        // The registry and the router both rely on value equality for
        // snapshot comparisons in tests.
        let a = make_record("p1", "192.168.1.100", 43296);
        let b = make_record("p1", "192.168.1.100", 43296);
        assert_eq!(a, b);
    }

    #[test]
    fn test_records_with_different_pairing_ids_compare_unequal() {
        let a = make_record("p1", "192.168.1.100", 43296);
        let b = make_record("p2", "192.168.1.100", 43296);
        assert_ne!(a, b);
    }

    #[test]
    fn test_desktop_addr_parses_ipv6() {
        let record = make_record("p1", "fe80::1", 43296);
        assert!(record.desktop_addr.is_ipv6());
    }
}
