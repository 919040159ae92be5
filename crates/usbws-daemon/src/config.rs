//! TOML configuration file for the daemon.
//!
//! The file is optional.  Every field has a serde default, so an empty file
//! (or no file at all) yields the built-in defaults, and command-line flags
//! are applied on top afterwards.
//!
//! ```toml
//! [listen]
//! bind = "0.0.0.0"
//! port = 0          # 0 = 80, or 443 with TLS
//! path = "usbip"
//! interval = 60     # keepalive seconds, 0 disables
//!
//! [tls]
//! enabled = false
//! key = "cert/server.key"
//! cert = "cert/server.crt"
//!
//! [upstream]
//! usbipd = "127.0.0.1:3240"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use usbws_bridge::domain::config::{DEFAULT_CERT_FILE, DEFAULT_KEY_FILE};
use usbws_bridge::domain::resolve_port;
use usbws_bridge::{ServerConfig, TlsFiles};
use usbws_core::protocol::{DEFAULT_PATH, PING_PONG_DEFAULT, USBIP_PORT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
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

    /// `listen.bind` is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Where and how the WebSocket listener accepts connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// TCP port; `0` picks 80, or 443 with TLS.
    #[serde(default)]
    pub port: u16,
    /// URL path accepted for the upgrade, without the leading `/`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Keepalive interval in seconds; `0` disables keepalive.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

/// TLS key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_key")]
    pub key: PathBuf,
    #[serde(default = "default_cert")]
    pub cert: PathBuf,
}

/// The local usbipd every session is relayed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// `host:port` of usbipd.
    #[serde(default = "default_usbipd")]
    pub usbipd: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_path() -> String {
    DEFAULT_PATH.to_string()
}
fn default_interval() -> u64 {
    PING_PONG_DEFAULT.as_secs()
}
fn default_key() -> PathBuf {
    PathBuf::from(DEFAULT_KEY_FILE)
}
fn default_cert() -> PathBuf {
    PathBuf::from(DEFAULT_CERT_FILE)
}
fn default_usbipd() -> String {
    format!("127.0.0.1:{USBIP_PORT}")
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 0,
            path: default_path(),
            interval: default_interval(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: default_key(),
            cert: default_cert(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            usbipd: default_usbipd(),
        }
    }
}

impl DaemonConfig {
    /// Converts the file schema into the listener configuration, resolving
    /// the port and parsing the bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBind`] if `listen.bind` is not an IP
    /// address.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let bind: IpAddr = self
            .listen
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.listen.bind.clone()))?;

        Ok(ServerConfig {
            bind,
            port: resolve_port(self.listen.port, self.tls.enabled),
            path: self.listen.path.trim_start_matches('/').to_string(),
            keepalive: Duration::from_secs(self.listen.interval),
            tls: self.tls.enabled.then(|| TlsFiles {
                key: self.tls.key.clone(),
                cert: self.tls.cert.clone(),
            }),
        })
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads a [`DaemonConfig`] from `path`.
///
/// Unlike an implicit default location, an explicitly named file must exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_listens_on_port_80_path_usbip() {
        // Arrange / Act
        let server = DaemonConfig::default().server_config().unwrap();

        // Assert
        assert_eq!(server.port, 80);
        assert_eq!(server.path, "usbip");
        assert_eq!(server.keepalive, Duration::from_secs(60));
        assert!(server.tls.is_none());
    }

    #[test]
    fn test_tls_enabled_defaults_port_to_443() {
        let mut cfg = DaemonConfig::default();
        cfg.tls.enabled = true;

        let server = cfg.server_config().unwrap();

        assert_eq!(server.port, 443);
        assert_eq!(server.tls.unwrap().key, PathBuf::from("cert/server.key"));
    }

    #[test]
    fn test_explicit_port_is_kept_with_tls() {
        let mut cfg = DaemonConfig::default();
        cfg.tls.enabled = true;
        cfg.listen.port = 8443;
        assert_eq!(cfg.server_config().unwrap().port, 8443);
    }

    #[test]
    fn test_default_upstream_is_local_usbipd() {
        assert_eq!(UpstreamConfig::default().usbipd, "127.0.0.1:3240");
    }

    #[test]
    fn test_invalid_bind_is_rejected() {
        let mut cfg = DaemonConfig::default();
        cfg.listen.bind = "not.an.ip".to_string();
        assert!(matches!(
            cfg.server_config(),
            Err(ConfigError::InvalidBind(_))
        ));
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        // Arrange
        let text = "[listen]\nport = 8080\n\n[upstream]\nusbipd = \"10.0.0.2:3240\"\n";

        // Act
        let cfg: DaemonConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.listen.port, 8080);
        assert_eq!(cfg.listen.path, "usbip");
        assert_eq!(cfg.listen.interval, 60);
        assert!(!cfg.tls.enabled);
        assert_eq!(cfg.upstream.usbipd, "10.0.0.2:3240");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listen]\npath = \"/devices\"\ninterval = 0").unwrap();

        // Act
        let cfg = load_config(file.path()).unwrap();
        let server = cfg.server_config().unwrap();

        // Assert
        assert_eq!(server.path, "devices");
        assert_eq!(server.keepalive, Duration::ZERO);
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_malformed_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listen\nport = ").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
