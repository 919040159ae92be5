//! Errors raised while setting up or running a WebSocket connection.

use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use usbws_core::TargetError;

/// Failures of the bridge outside an established session.
///
/// Once a session is Active its failures surface only through
/// [`SessionError`](usbws_core::SessionError) from `send`/`recv`.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// TCP connection to the daemon or proxy could not be opened.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The HTTP proxy refused or garbled the `CONNECT` tunnel.
    #[error("proxy {proxy}: {reason}")]
    Proxy { proxy: String, reason: String },

    /// Certificates, keys or the rustls configuration could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The WebSocket upgrade failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] Box<tungstenite::Error>),

    /// The target URL, proxy or verification mode is invalid.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The connection ended before the session became active.
    #[error("connection closed before the session started")]
    Closed,

    /// The background event loop could not be started.
    #[error("event loop failed: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    pub(crate) fn handshake(err: tungstenite::Error) -> Self {
        BridgeError::Handshake(Box::new(err))
    }

    pub(crate) fn tls(err: impl std::fmt::Display) -> Self {
        BridgeError::Tls(err.to_string())
    }
}
