//! TOML-based configuration persistence for the unlock server.
//!
//! Reads and writes [`ServerConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\PCBUnlock\config.toml`
//! - Linux:    `~/.config/pcbunlock/config.toml`
//! - macOS:    `~/Library/Application Support/PCBUnlock/config.toml`
//!
//! Pairing itself happens out of band (the desktop app's QR flow); the
//! resulting records land here as `[[locks]]` entries and are turned into
//! validated [`LockRecord`]s at startup. Fields annotated with
//! `#[serde(default = "...")]` keep older config files loadable after new
//! fields are added.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pcbu_core::{LockRecord, PairingCredentials, RemoteInfo};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: GeneralConfig,
    /// One entry per paired desktop.
    #[serde(default)]
    pub locks: Vec<LockEntry>,
}

/// General server behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// IP address unlock listeners bind to. `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port on each paired desktop that answers unlock requests.
    #[serde(default = "default_desktop_unlock_port")]
    pub desktop_unlock_port: u16,
}

/// Persisted record of one paired desktop.
///
/// Credential fields are stored flat; they are opaque pass-through values
/// for the protocol library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockEntry {
    /// Pairing id issued by the desktop; unique id of the lock entity.
    pub pairing_id: String,
    /// Address of the paired desktop.
    pub desktop_addr: IpAddr,
    /// Port the unlock listener for this lock runs on.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub username: String,
    pub password: String,
    pub encryption_key: String,
    pub remote_info: RemoteInfo,
}

impl From<LockEntry> for LockRecord {
    fn from(entry: LockEntry) -> Self {
        LockRecord {
            pairing_id: entry.pairing_id,
            desktop_addr: entry.desktop_addr,
            server_port: entry.server_port,
            credentials: PairingCredentials {
                username: entry.username,
                password: entry.password,
                encryption_key: entry.encryption_key,
            },
            remote_info: entry.remote_info,
        }
    }
}

impl From<LockRecord> for LockEntry {
    fn from(record: LockRecord) -> Self {
        LockEntry {
            pairing_id: record.pairing_id,
            desktop_addr: record.desktop_addr,
            server_port: record.server_port,
            username: record.credentials.username,
            password: record.credentials.password,
            encryption_key: record.credentials.encryption_key,
            remote_info: record.remote_info,
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_desktop_unlock_port() -> u16 {
    43295
}
fn default_server_port() -> u16 {
    43296
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            log_level: default_log_level(),
            desktop_unlock_port: default_desktop_unlock_port(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`ServerConfig`] from disk, returning `ServerConfig::default()` if
/// the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: ServerConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PCBUnlock"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("pcbunlock"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PCBUnlock")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn make_entry(pairing_id: &str, port: u16) -> LockEntry {
        LockEntry {
            pairing_id: pairing_id.to_string(),
            desktop_addr: "192.168.1.100".parse().unwrap(),
            server_port: port,
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            encryption_key: "0123456789abcdef".to_string(),
            remote_info: RemoteInfo {
                name: "office-pc".to_string(),
                mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
                os: "Windows 11".to_string(),
            },
        }
    }

    #[test]
    fn test_default_config_has_expected_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
        assert_eq!(cfg.server.log_level, "info");
        assert_eq!(cfg.server.desktop_unlock_port, 43295);
        assert!(cfg.locks.is_empty());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        // Arrange
        let mut cfg = ServerConfig::default();
        cfg.server.bind_address = "192.168.1.5".to_string();
        cfg.locks.push(make_entry("p1", 43296));
        cfg.locks.push(make_entry("p2", 43297));

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: ServerConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
        assert_eq!(restored.locks.len(), 2);
    }

    #[test]
    fn test_deserialize_minimal_toml_uses_defaults() {
        let cfg: ServerConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg.server.log_level, "info");
        assert!(cfg.locks.is_empty());
    }

    #[test]
    fn test_deserialize_partial_server_section_overrides_defaults() {
        let toml_str = r#"
[server]
log_level = "debug"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).expect("deserialize partial");
        assert_eq!(cfg.server.log_level, "debug");
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_lock_entry_without_server_port_gets_default() {
        let toml_str = r#"
[[locks]]
pairing_id = "p1"
desktop_addr = "192.168.1.100"
username = "alice"
password = "hunter2"
encryption_key = "0123456789abcdef"

[locks.remote_info]
name = "office-pc"
mac_address = "aa:bb:cc:dd:ee:ff"
os = "Windows 11"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).expect("deserialize");
        assert_eq!(cfg.locks[0].server_port, 43296);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<ServerConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_entry_converts_to_record_and_back() {
        // Arrange
        let entry = make_entry("p1", 43296);

        // Act
        let record: LockRecord = entry.clone().into();
        let back: LockEntry = record.clone().into();

        // Assert
        assert_eq!(record.pairing_id, "p1");
        assert_eq!(record.credentials.username, "alice");
        assert_eq!(record.remote_info.name, "office-pc");
        assert_eq!(back, entry);
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        // Arrange – write to a private temp path (mirrors save_config logic
        // without touching the real platform config dir)
        let dir = std::env::temp_dir().join(format!("pcbu_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut cfg = ServerConfig::default();
        cfg.locks.push(make_entry(&Uuid::new_v4().to_string(), 43296));

        // Act
        let content = toml::to_string_pretty(&cfg).unwrap();
        std::fs::write(&path, &content).unwrap();
        let loaded: ServerConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"));
        }
        // NoPlatformConfigDir in a stripped CI env is also acceptable.
    }
}
