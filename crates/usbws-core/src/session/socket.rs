//! The blocking socket contract seen by the tunnelled protocol engine.

use std::fmt;

use super::error::SessionError;

/// Remote endpoint of a session as numeric host and port strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerAddr {
    pub host: String,
    pub port: String,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port().to_string())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A byte-stream socket with blocking semantics.
///
/// This is the only surface a protocol engine needs.  Implementations must
/// be usable from a thread other than the one driving the transport.
pub trait BlockingSocket: Send + Sync {
    /// Writes all of `buf`, blocking until it has been handed to the
    /// transport.  Returns the number of bytes written (`buf.len()` on
    /// success).
    fn send(&self, buf: &[u8]) -> Result<usize, SessionError>;

    /// Reads into `buf`.
    ///
    /// With `all = true` blocks until exactly `buf.len()` bytes are read.
    /// With `all = false` returns as soon as at least one byte is available.
    fn recv(&self, buf: &mut [u8], all: bool) -> Result<usize, SessionError>;

    /// Ends the session and wakes every blocked caller.  Idempotent.
    fn shutdown(&self);

    /// The remote endpoint.
    fn peer(&self) -> PeerAddr;
}
