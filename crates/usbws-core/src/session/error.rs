//! Session error types.

use std::fmt;
use std::io;

use thiserror::Error;

/// Why a session left the Active state.
///
/// Only the first reason is recorded; later discontinue calls keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscontinueReason {
    /// The peer closed the WebSocket or the TCP connection went away.
    TransportClosed,
    /// A read or write on the transport failed.
    TransportError,
    /// The local side called `shutdown`.
    LocalShutdown,
    /// The peer stayed silent past the keepalive deadline.
    KeepaliveTimeout,
    /// The process received an interrupt.
    Interrupted,
}

impl fmt::Display for DiscontinueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscontinueReason::TransportClosed => "transport closed",
            DiscontinueReason::TransportError => "transport error",
            DiscontinueReason::LocalShutdown => "local shutdown",
            DiscontinueReason::KeepaliveTimeout => "keepalive timeout",
            DiscontinueReason::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Errors returned by the blocking socket operations of a session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The session is no longer active.
    #[error("session discontinued: {0}")]
    Discontinued(DiscontinueReason),

    /// `send` was called while another `send` on the same session was still
    /// in flight.
    #[error("a send is already in flight on this session")]
    SendInFlight,
}

impl SessionError {
    /// The discontinue reason, if this error carries one.
    pub fn reason(&self) -> Option<DiscontinueReason> {
        match self {
            SessionError::Discontinued(r) => Some(*r),
            SessionError::SendInFlight => None,
        }
    }
}

impl From<SessionError> for io::Error {
    fn from(err: SessionError) -> Self {
        // Never `Interrupted`: std's read/write helpers retry on it.
        let kind = match err {
            SessionError::Discontinued(DiscontinueReason::KeepaliveTimeout) => {
                io::ErrorKind::TimedOut
            }
            SessionError::Discontinued(_) => io::ErrorKind::ConnectionAborted,
            SessionError::SendInFlight => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
