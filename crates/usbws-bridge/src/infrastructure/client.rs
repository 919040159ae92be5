//! Client bootstrap: open an outbound session and hand it to the caller as a
//! blocking socket.
//!
//! # How `Client::open` works (for beginners)
//!
//! The caller is ordinary blocking code (the `usbws` command).  The WebSocket
//! needs an async event loop.  So `open`:
//!
//! 1. Validates the configuration and builds the TLS config on the caller's
//!    thread, so configuration errors come back immediately.
//! 2. Starts a background thread running a single-threaded Tokio runtime
//!    with its own [`Context`].
//! 3. That thread connects (directly or through an HTTP proxy), performs
//!    the TLS and WebSocket handshakes offering the `usbip` sub-protocol, and
//!    then drives the connection.
//! 4. The Context's hooks report the outcome through a one-shot slot:
//!    the start hook sends the live session, the stop hook sends a failure.
//! 5. The caller blocks on that slot and gets either a [`ClientConnection`]
//!    or the connect error.
//!
//! Dropping the [`ClientConnection`] shuts the session down, stops the
//! Context and joins the background thread.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use usbws_core::protocol::PROTOCOL;
use usbws_core::{BlockingSocket, ClientTarget, HealthMonitor, PeerAddr, Session, SessionError};

use crate::application::{Connection, ConnectionId, Context, SessionHooks};
use crate::domain::ClientConfig;
use crate::error::BridgeError;
use crate::infrastructure::{connection, proxy, tls};

type ConnectResult = Result<Arc<Session>, BridgeError>;

/// Name of the background event-loop thread.
const LOOP_THREAD: &str = "usbws-client-loop";

// ── Handshake request ─────────────────────────────────────────────────────────

/// Builds the upgrade request for `target`, offering the `usbip`
/// sub-protocol.
pub fn upgrade_request(target: &ClientTarget) -> Result<Request, BridgeError> {
    let mut request = target
        .request_url()
        .into_client_request()
        .map_err(BridgeError::handshake)?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
    Ok(request)
}

/// Opens the TCP (or proxied) stream and performs the TLS and WebSocket
/// handshakes.
pub async fn connect(
    config: &ClientConfig,
    tls_config: Option<Arc<rustls::ClientConfig>>,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, PeerAddr), BridgeError> {
    let target = &config.target;
    let authority = target.authority();

    let tcp = match &config.proxy {
        Some(proxy_addr) => proxy::tunnel(proxy_addr, &authority).await?,
        None => TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|source| BridgeError::Connect {
                addr: authority.clone(),
                source,
            })?,
    };
    let _ = tcp.set_nodelay(true);

    let connector = match tls_config {
        Some(cfg) => Connector::Rustls(cfg),
        None => Connector::Plain,
    };
    let request = upgrade_request(target)?;
    let (ws, response) = client_async_tls_with_config(request, tcp, None, Some(connector))
        .await
        .map_err(BridgeError::handshake)?;

    debug!(
        status = %response.status(),
        protocol = ?response.headers().get(SEC_WEBSOCKET_PROTOCOL),
        "upgrade accepted"
    );
    Ok((ws, PeerAddr::new(target.host.clone(), target.port.to_string())))
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// Client-side hooks: report the connect outcome exactly once and stop the
/// private Context when the connection ends.
struct ClientHooks {
    result: Mutex<Option<SyncSender<ConnectResult>>>,
}

impl ClientHooks {
    fn new() -> (Arc<Self>, Receiver<ConnectResult>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (
            Arc::new(Self {
                result: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Sends `result` if nothing has been reported yet.
    fn report(&self, result: ConnectResult) {
        let sender = self
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(result);
        }
    }
}

impl SessionHooks for ClientHooks {
    fn on_session_start(&self, _ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
        match &conn.session {
            Some(session) => self.report(Ok(Arc::clone(session))),
            None => self.report(Err(BridgeError::Closed)),
        }
        Ok(())
    }

    fn on_session_stop(&self, ctx: &Context, _conn: &Connection) -> anyhow::Result<()> {
        self.report(Err(BridgeError::Closed));
        ctx.stop();
        Ok(())
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// One outbound connection attempt.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Connects and blocks until the session is Active or the attempt failed.
    ///
    /// # Errors
    ///
    /// Any [`BridgeError`]: TLS setup, TCP connect, proxy, handshake, or the
    /// connection closing before it became usable.
    pub fn open(self) -> Result<ClientConnection, BridgeError> {
        let tls_config = tls::client_config(
            self.config.tls_mode(),
            self.config.ca_file.as_deref(),
            self.config.client_auth.as_ref(),
        )?;

        let (hooks, outcome) = ClientHooks::new();
        let ctx = Context::new(
            HealthMonitor::for_client(self.config.keepalive),
            Arc::clone(&hooks) as Arc<dyn SessionHooks>,
        );

        let thread = thread::Builder::new()
            .name(LOOP_THREAD.to_string())
            .spawn({
                let ctx = ctx.clone();
                let config = self.config;
                move || run_event_loop(ctx, hooks, config, tls_config)
            })?;

        match outcome.recv() {
            Ok(Ok(session)) => {
                info!(url = %session.peer(), "connected");
                Ok(ClientConnection {
                    ctx,
                    session,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                ctx.stop();
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(BridgeError::Runtime(
                    "event loop exited without reporting".to_string(),
                ))
            }
        }
    }
}

/// Body of the background thread.
fn run_event_loop(
    ctx: Context,
    hooks: Arc<ClientHooks>,
    config: ClientConfig,
    tls_config: Option<Arc<rustls::ClientConfig>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            hooks.report(Err(BridgeError::Runtime(e.to_string())));
            return;
        }
    };
    ctx.attach_runtime(runtime.handle().clone());

    runtime.block_on(async {
        let health = tokio::spawn(ctx.clone().run_health_monitor());

        match connect(&config, tls_config).await {
            Ok((ws, peer)) => connection::drive(&ctx, ws, peer).await,
            Err(e) => {
                warn!(url = %config.target.url, "failed to connect: {e}");
                hooks.report(Err(e));
                let conn = Connection {
                    id: ConnectionId::default(),
                    peer: PeerAddr::new(
                        config.target.host.clone(),
                        config.target.port.to_string(),
                    ),
                    session: None,
                };
                ctx.stop_session(&conn);
            }
        }

        ctx.stop();
        let _ = health.await;
    });

    ctx.detach_runtime();
    debug!("end of client thread");
}

// ── ClientConnection ──────────────────────────────────────────────────────────

/// A live outbound session usable as a blocking socket from the caller's
/// thread.
pub struct ClientConnection {
    ctx: Context,
    session: Arc<Session>,
    thread: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// The Context of this connection's event loop.  Pass it to
    /// [`service_interrupts`](crate::infrastructure::interrupt::service_interrupts)
    /// to make Ctrl+C end the session.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }
}

impl BlockingSocket for ClientConnection {
    fn send(&self, buf: &[u8]) -> Result<usize, SessionError> {
        self.session.send(buf)
    }

    fn recv(&self, buf: &mut [u8], all: bool) -> Result<usize, SessionError> {
        self.session.recv(buf, all)
    }

    fn shutdown(&self) {
        self.session.shutdown();
    }

    fn peer(&self) -> PeerAddr {
        self.session.peer()
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.session.shutdown();
        self.ctx.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("peer", &self.session.peer())
            .field("active", &self.session.is_active())
            .finish()
    }
}
