//! Daemon side: accept loop and WebSocket upgrade checks.
//!
//! This module is responsible for:
//!
//! 1. Binding the TCP listener described by a [`ServerConfig`].
//! 2. Accepting connections and, when TLS is configured, running the TLS
//!    handshake.
//! 3. Upgrading each connection to a WebSocket, accepting only the configured
//!    path and echoing the `usbip` sub-protocol.
//! 4. Handing the upgraded stream to the connection driver on its own task.
//! 5. Running the keepalive sweep for every session of the Context.
//! 6. Stopping when the Context stops, and waiting for every connection to
//!    finish its close sequence.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    Callback, ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{debug, error, info, warn};

use usbws_core::protocol::PROTOCOL;
use usbws_core::PeerAddr;

use crate::application::Context;
use crate::domain::ServerConfig;
use crate::infrastructure::{connection, tls};

/// How long the accept loop waits for open connections after a stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ── Upgrade checks ────────────────────────────────────────────────────────────

/// Handshake callback: checks the request path and negotiates the
/// sub-protocol.
#[derive(Debug, Clone)]
pub struct UpgradeCheck {
    path: String,
}

impl UpgradeCheck {
    /// `path` without the leading `/`; empty accepts every path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into().trim_start_matches('/').to_string(),
        }
    }

    fn offers_protocol(request: &Request) -> bool {
        request
            .headers()
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|p| p.trim().eq_ignore_ascii_case(PROTOCOL))
    }
}

impl Callback for UpgradeCheck {
    fn on_request(self, request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
        let requested = request.uri().path().trim_start_matches('/');
        if !self.path.is_empty() && requested != self.path {
            debug!(path = requested, "rejecting upgrade for unknown path");
            let mut err = ErrorResponse::new(Some(format!("unknown path /{requested}")));
            *err.status_mut() = StatusCode::NOT_FOUND;
            return Err(err);
        }

        if Self::offers_protocol(request) {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
        }
        Ok(response)
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A bound daemon listener.
pub struct Server {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    path: String,
}

impl Server {
    /// Loads TLS material (if configured) and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or certificate cannot be loaded, or the
    /// port cannot be bound.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let acceptor = config
            .tls
            .as_ref()
            .map(tls::server_acceptor)
            .transpose()
            .context("failed to set up TLS")?;

        let addr = SocketAddr::new(config.bind, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;

        Ok(Self {
            listener,
            acceptor,
            path: config.path.clone(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `ctx` stops, then waits (bounded) for the
    /// open connections to close.
    pub async fn run(self, ctx: Context) -> anyhow::Result<()> {
        info!(
            addr = %self.local_addr()?,
            tls = self.acceptor.is_some(),
            path = %self.path,
            "started service"
        );

        let health = tokio::spawn(ctx.clone().run_health_monitor());
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.stopped() => {
                    info!("stop requested; leaving accept loop");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((tcp, addr)) => {
                        debug!(%addr, "accepted connection");
                        connections.spawn(handle_connection(
                            ctx.clone(),
                            tcp,
                            addr,
                            self.acceptor.clone(),
                            UpgradeCheck::new(self.path.clone()),
                        ));
                    }
                    Err(e) => error!("accept error: {e}"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!("connection task failed: {e}");
                    }
                }
            }
        }

        ctx.discontinue_all(usbws_core::DiscontinueReason::Interrupted);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("connections still open after {SHUTDOWN_GRACE:?}; aborting them");
            connections.shutdown().await;
        }
        let _ = health.await;

        info!("end of service");
        Ok(())
    }
}

async fn handle_connection(
    ctx: Context,
    tcp: TcpStream,
    addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    check: UpgradeCheck,
) {
    let _ = tcp.set_nodelay(true);
    let peer = PeerAddr::from(addr);
    match acceptor {
        Some(acceptor) => match acceptor.accept(tcp).await {
            Ok(stream) => upgrade(ctx, stream, peer, check).await,
            Err(e) => warn!(%addr, "TLS handshake failed: {e}"),
        },
        None => upgrade(ctx, tcp, peer, check).await,
    }
}

async fn upgrade<S>(ctx: Context, stream: S, peer: PeerAddr, check: UpgradeCheck)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match accept_hdr_async(stream, check).await {
        Ok(ws) => connection::drive(&ctx, ws, peer).await,
        Err(e) => warn!(%peer, "WebSocket handshake failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http;

    fn request(path: &str, protocol: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(path);
        if let Some(p) = protocol {
            builder = builder.header(SEC_WEBSOCKET_PROTOCOL, p);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_upgrade_accepts_configured_path_and_echoes_protocol() {
        // Arrange
        let check = UpgradeCheck::new("usbip");

        // Act
        let response = check
            .on_request(&request("/usbip", Some("usbip")), Response::new(()))
            .unwrap();

        // Assert
        assert_eq!(
            response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "usbip"
        );
    }

    #[test]
    fn test_upgrade_picks_protocol_from_list() {
        let check = UpgradeCheck::new("usbip");
        let response = check
            .on_request(&request("/usbip", Some("chat, usbip")), Response::new(()))
            .unwrap();
        assert!(response.headers().contains_key(SEC_WEBSOCKET_PROTOCOL));
    }

    #[test]
    fn test_upgrade_without_protocol_offer_is_accepted_plainly() {
        let check = UpgradeCheck::new("usbip");
        let response = check
            .on_request(&request("/usbip", None), Response::new(()))
            .unwrap();
        assert!(!response.headers().contains_key(SEC_WEBSOCKET_PROTOCOL));
    }

    #[test]
    fn test_upgrade_rejects_unknown_path() {
        let check = UpgradeCheck::new("/usbip");
        let err = check
            .on_request(&request("/other", Some("usbip")), Response::new(()))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_empty_path_accepts_anything() {
        let check = UpgradeCheck::new("");
        assert!(check
            .on_request(&request("/whatever", None), Response::new(()))
            .is_ok());
    }
}
