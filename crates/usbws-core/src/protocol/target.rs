//! Parsing of outbound connection targets.
//!
//! A client is pointed at the daemon with a URL such as
//! `wss://usb.example.com/usbip`.  This module turns that string into a
//! [`ClientTarget`] (scheme, host, port, path), normalises an optional HTTP
//! proxy to `host:port`, and parses the certificate verification mode.
//!
//! Everything here is pure parsing: nothing opens a socket.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Port assumed for a proxy given without one.
const DEFAULT_PROXY_PORT: u16 = 80;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Configuration errors detected while parsing a target, proxy or mode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// The URL could not be parsed at all.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL parsed but its scheme is neither `ws` nor `wss`.
    #[error("unsupported method in url: {0}")]
    UnsupportedScheme(String),

    /// The URL has no host component.
    #[error("missing host in url: {0}")]
    MissingHost(String),

    /// The proxy address could not be parsed.
    #[error("invalid proxy '{0}'")]
    InvalidProxy(String),

    /// Unknown certificate verification mode.
    #[error("unknown verification mode '{0}' (expected strict or relaxed)")]
    InvalidVerification(String),
}

// ── Scheme / TLS mode ─────────────────────────────────────────────────────────

/// WebSocket URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain `ws://`.
    Ws,
    /// TLS-secured `wss://`.
    Wss,
}

impl Scheme {
    /// Returns `true` when the scheme implies TLS.
    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Wss)
    }

    /// Port used when the URL does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Ws => f.write_str("ws"),
            Scheme::Wss => f.write_str("wss"),
        }
    }
}

/// How the client checks the daemon's certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verification {
    /// Verify the chain against the web PKI roots plus an optional CA file.
    Strict,
    /// Accept any certificate.  Suitable for self-signed deployments.
    #[default]
    Relaxed,
}

impl FromStr for Verification {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Verification::Strict),
            "relaxed" | "none" => Ok(Verification::Relaxed),
            other => Err(TargetError::InvalidVerification(other.to_string())),
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Strict => f.write_str("strict"),
            Verification::Relaxed => f.write_str("relaxed"),
        }
    }
}

/// Transport security selected for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Off,
    Strict,
    Relaxed,
}

impl TlsMode {
    /// Combines the URL scheme with the requested verification mode.
    pub fn select(scheme: Scheme, verification: Verification) -> Self {
        match (scheme.is_secure(), verification) {
            (false, _) => TlsMode::Off,
            (true, Verification::Strict) => TlsMode::Strict,
            (true, Verification::Relaxed) => TlsMode::Relaxed,
        }
    }
}

// ── ClientTarget ──────────────────────────────────────────────────────────────

/// A parsed `ws://` or `wss://` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTarget {
    /// The URL exactly as given.
    pub url: String,
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path without the leading `/`, possibly empty.
    pub path: String,
}

impl ClientTarget {
    /// Parses a target URL.
    ///
    /// # Errors
    ///
    /// - [`TargetError::InvalidUrl`] if the string is not a URL.
    /// - [`TargetError::UnsupportedScheme`] for anything but `ws`/`wss`.
    /// - [`TargetError::MissingHost`] if the URL has no host.
    pub fn parse(url: &str) -> Result<Self, TargetError> {
        let parsed = Url::parse(url).map_err(|e| TargetError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match parsed.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TargetError::MissingHost(url.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = parsed.port().unwrap_or_else(|| scheme.default_port());
        let path = parsed.path().trim_start_matches('/').to_string();

        Ok(Self {
            url: url.to_string(),
            scheme,
            host,
            port,
            path,
        })
    }

    /// `host:port` string suitable for `TcpStream::connect` and for an HTTP
    /// `CONNECT` request line.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The URL re-assembled from its parsed parts, as sent in the handshake.
    pub fn request_url(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.authority(), self.path)
    }
}

// ── ProxyAddr ─────────────────────────────────────────────────────────────────

/// An HTTP proxy normalised to `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddr {
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    /// Parses `http://host:port/`, `host:port` or a bare `host`.
    ///
    /// A missing port defaults to 80.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::InvalidProxy`] if no host can be extracted or
    /// the port is not a number.
    pub fn parse(proxy: &str) -> Result<Self, TargetError> {
        let invalid = || TargetError::InvalidProxy(proxy.to_string());

        let trimmed = proxy.trim();
        let rest = match trimmed.find("://") {
            Some(idx) => &trimmed[idx + 3..],
            None => trimmed,
        };
        // Drop any path and user-info.
        let authority = rest.split('/').next().unwrap_or_default();
        let authority = authority.rsplit('@').next().unwrap_or_default();

        let (host, port) = if let Some(stripped) = authority.strip_prefix('[') {
            // [v6]:port
            let end = stripped.find(']').ok_or_else(invalid)?;
            let host = &stripped[..end];
            let port = match stripped[end + 1..].strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| invalid())?,
                None => DEFAULT_PROXY_PORT,
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((h, p)) => (h, p.parse().map_err(|_| invalid())?),
                None => (authority, DEFAULT_PROXY_PORT),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ProxyAddr {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ws_url_defaults_to_port_80() {
        // Act
        let target = ClientTarget::parse("ws://example.com/usbip").unwrap();

        // Assert
        assert_eq!(target.scheme, Scheme::Ws);
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "usbip");
    }

    #[test]
    fn test_parse_wss_url_defaults_to_port_443() {
        let target = ClientTarget::parse("wss://example.com/usbip").unwrap();
        assert_eq!(target.scheme, Scheme::Wss);
        assert_eq!(target.port, 443);
    }

    #[test]
    fn test_parse_url_with_explicit_port() {
        let target = ClientTarget::parse("ws://10.0.0.5:8080/tunnel").unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 8080);
        assert_eq!(target.path, "tunnel");
        assert_eq!(target.authority(), "10.0.0.5:8080");
    }

    #[test]
    fn test_parse_url_with_empty_path() {
        let target = ClientTarget::parse("ws://localhost").unwrap();
        assert_eq!(target.path, "");
        assert_eq!(target.request_url(), "ws://localhost:80/");
    }

    #[test]
    fn test_parse_ipv6_host_is_stripped_of_brackets() {
        let target = ClientTarget::parse("ws://[::1]:9000/usbip").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.authority(), "[::1]:9000");
    }

    #[test]
    fn test_parse_http_scheme_is_rejected() {
        // Act
        let result = ClientTarget::parse("http://example.com/usbip");

        // Assert
        assert_eq!(
            result,
            Err(TargetError::UnsupportedScheme("http".to_string()))
        );
    }

    #[test]
    fn test_parse_garbage_is_invalid_url() {
        let result = ClientTarget::parse("not a url");
        assert!(matches!(result, Err(TargetError::InvalidUrl { .. })));
    }

    #[test]
    fn test_proxy_with_scheme_and_trailing_slash() {
        let proxy = ProxyAddr::parse("http://proxy.example:3128/").unwrap();
        assert_eq!(proxy.to_string(), "proxy.example:3128");
    }

    #[test]
    fn test_proxy_host_port() {
        let proxy = ProxyAddr::parse("proxy.example:3128").unwrap();
        assert_eq!(proxy.host, "proxy.example");
        assert_eq!(proxy.port, 3128);
    }

    #[test]
    fn test_proxy_without_port_defaults_to_80() {
        let proxy = ProxyAddr::parse("proxy.example").unwrap();
        assert_eq!(proxy.to_string(), "proxy.example:80");
    }

    #[test]
    fn test_proxy_with_credentials_drops_user_info() {
        let proxy = ProxyAddr::parse("http://user:pw@proxy.example:8080").unwrap();
        assert_eq!(proxy.to_string(), "proxy.example:8080");
    }

    #[test]
    fn test_proxy_with_bad_port_is_rejected() {
        assert!(ProxyAddr::parse("proxy.example:abc").is_err());
        assert!(ProxyAddr::parse("").is_err());
    }

    #[test]
    fn test_verification_parsing() {
        assert_eq!("strict".parse::<Verification>(), Ok(Verification::Strict));
        assert_eq!("relaxed".parse::<Verification>(), Ok(Verification::Relaxed));
        assert_eq!("NONE".parse::<Verification>(), Ok(Verification::Relaxed));
        assert!("paranoid".parse::<Verification>().is_err());
    }

    #[test]
    fn test_tls_mode_selection() {
        assert_eq!(TlsMode::select(Scheme::Ws, Verification::Strict), TlsMode::Off);
        assert_eq!(
            TlsMode::select(Scheme::Wss, Verification::Strict),
            TlsMode::Strict
        );
        assert_eq!(
            TlsMode::select(Scheme::Wss, Verification::Relaxed),
            TlsMode::Relaxed
        );
    }
}
