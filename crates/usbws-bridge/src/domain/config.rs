//! Transport configuration for both roles.
//!
//! [`ServerConfig`] describes what the daemon listens on; [`ClientConfig`]
//! describes one outbound connection.  Both are plain structs: the binaries
//! fill them from the command line (and, for the daemon, a TOML file) and the
//! infrastructure layer consumes them.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use usbws_core::protocol::{DEFAULT_PATH, PING_PONG_DEFAULT};
use usbws_core::{ClientTarget, ProxyAddr, TargetError, TlsMode, Verification};

/// Default private key path for TLS.
pub const DEFAULT_KEY_FILE: &str = "cert/server.key";

/// Default certificate path for TLS.
pub const DEFAULT_CERT_FILE: &str = "cert/server.crt";

/// Resolves a configured port: `0` means "80, or 443 with TLS".
pub fn resolve_port(port: u16, tls: bool) -> u16 {
    match (port, tls) {
        (0, true) => 443,
        (0, false) => 80,
        (p, _) => p,
    }
}

/// Paths of a PEM private key and certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub key: PathBuf,
    pub cert: PathBuf,
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            key: PathBuf::from(DEFAULT_KEY_FILE),
            cert: PathBuf::from(DEFAULT_CERT_FILE),
        }
    }
}

// ── Daemon side ───────────────────────────────────────────────────────────────

/// Everything the daemon's listener needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// Listening port, already resolved with [`resolve_port`].
    pub port: u16,
    /// Accepted URL path without the leading `/`.  Empty accepts any path.
    pub path: String,
    /// Keepalive interval; zero disables keepalive.
    pub keepalive: Duration,
    /// Key and certificate when TLS is on.
    pub tls: Option<TlsFiles>,
}

impl Default for ServerConfig {
    /// Plain WebSocket on `0.0.0.0:80`, path `usbip`, 60 s keepalive.
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: resolve_port(0, false),
            path: DEFAULT_PATH.to_string(),
            keepalive: PING_PONG_DEFAULT,
            tls: None,
        }
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Everything needed to open one outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub target: ClientTarget,
    pub proxy: Option<ProxyAddr>,
    /// Keepalive interval before the client margin is added; zero disables.
    pub keepalive: Duration,
    pub verification: Verification,
    /// Extra trust anchor for strict verification.
    pub ca_file: Option<PathBuf>,
    /// Client certificate presented to the daemon, if any.
    pub client_auth: Option<TlsFiles>,
}

impl ClientConfig {
    /// Parses `url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetError`] for anything but a `ws://` or `wss://` URL.
    pub fn new(url: &str) -> Result<Self, TargetError> {
        Ok(Self {
            target: ClientTarget::parse(url)?,
            proxy: None,
            keepalive: PING_PONG_DEFAULT,
            verification: Verification::default(),
            ca_file: None,
            client_auth: None,
        })
    }

    /// Sets the HTTP proxy, normalising it to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::InvalidProxy`] if the address cannot be parsed.
    pub fn with_proxy(mut self, proxy: Option<&str>) -> Result<Self, TargetError> {
        self.proxy = proxy.map(ProxyAddr::parse).transpose()?;
        Ok(self)
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    pub fn tls_mode(&self) -> TlsMode {
        TlsMode::select(self.target.scheme, self.verification)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_port_defaults() {
        assert_eq!(resolve_port(0, false), 80);
        assert_eq!(resolve_port(0, true), 443);
        assert_eq!(resolve_port(8443, true), 8443);
    }

    #[test]
    fn test_server_config_default() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.port, 80);
        assert_eq!(cfg.path, "usbip");
        assert_eq!(cfg.keepalive, Duration::from_secs(60));
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn test_tls_files_default_paths() {
        let files = TlsFiles::default();
        assert_eq!(files.key, PathBuf::from("cert/server.key"));
        assert_eq!(files.cert, PathBuf::from("cert/server.crt"));
    }

    #[test]
    fn test_client_config_tls_mode_follows_scheme() {
        let plain = ClientConfig::new("ws://host/usbip").unwrap();
        assert_eq!(plain.tls_mode(), TlsMode::Off);

        let secure = ClientConfig::new("wss://host/usbip").unwrap();
        assert_eq!(secure.tls_mode(), TlsMode::Relaxed);
        assert_eq!(
            secure.with_verification(Verification::Strict).tls_mode(),
            TlsMode::Strict
        );
    }

    #[test]
    fn test_client_config_normalises_proxy() {
        let cfg = ClientConfig::new("ws://host/usbip")
            .unwrap()
            .with_proxy(Some("http://proxy.local:3128/"))
            .unwrap();
        assert_eq!(cfg.proxy.unwrap().to_string(), "proxy.local:3128");
    }

    #[test]
    fn test_client_config_rejects_bad_scheme() {
        assert!(ClientConfig::new("ftp://host/usbip").is_err());
    }
}
