//! Per-connection event loop driver.
//!
//! [`drive`] owns one established WebSocket for its whole life.  It is the
//! only code that reads or writes the socket, and it only ever talks to the
//! worker thread through the [`Session`].
//!
//! # Loop
//!
//! ```text
//! register session ─▶ on_session_start hook
//!        │
//!        ▼
//! ┌─ select ───────────────────────────────────────────────┐
//! │  session wake  → one write opportunity (data or ping)   │
//! │  incoming frame→ binary: queue; pong: keepalive; close  │
//! │  context stop  → discontinue (interrupted)              │
//! └──────────── until the session is discontinued or the ──┘
//!                transport ends
//!        │
//!        ▼
//! graceful close (ping + close frame 1000 "!") if we initiated
//! bounded wait for the worker to read queued input
//! session.close() ─▶ unregister ─▶ on_session_stop hook
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use usbws_core::protocol::{CLOSE_REASON, PING_PAYLOAD, RECV_DRAIN_WAIT, SEND_CONTENT};
use usbws_core::{DiscontinueReason, Outgoing, PeerAddr, PongOutcome, Session};

use crate::application::{Connection, Context};

/// How long a locally initiated close waits for the peer's close reply.
const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// Poll period of the drain wait at close.
const DRAIN_POLL: Duration = Duration::from_millis(20);

type Sink<S> = SplitSink<WebSocketStream<S>, Message>;
type Source<S> = SplitStream<WebSocketStream<S>>;

/// How the select loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// The session was discontinued locally (shutdown, keepalive, interrupt
    /// or a failed write); we start the closing handshake.
    Local,
    /// The peer closed the connection or the transport failed.
    Remote,
}

/// Runs one established connection to completion.
pub async fn drive<S>(ctx: &Context, ws: WebSocketStream<S>, peer: PeerAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let session = ctx.register(peer.clone());
    let conn = Connection {
        id: session.id(),
        peer,
        session: Some(Arc::clone(&session)),
    };
    info!(connection = conn.id, peer = %conn.peer, "session established");

    if let Err(e) = ctx.start_session(&conn) {
        warn!(connection = conn.id, "session start hook failed: {e:#}");
        session.discontinue(DiscontinueReason::LocalShutdown);
    }

    let (mut sink, mut source) = ws.split();

    let exit = run_loop(ctx, &session, &mut sink, &mut source).await;
    if exit == Exit::Local {
        close_gracefully(&session, &mut sink, &mut source).await;
    }

    wait_recv_drained(&session).await;
    session.close();
    ctx.unregister(conn.id);
    info!(
        connection = conn.id,
        peer = %conn.peer,
        reason = %session.reason().unwrap_or(DiscontinueReason::TransportClosed),
        "session closed"
    );
    ctx.stop_session(&conn);
}

async fn run_loop<S>(
    ctx: &Context,
    session: &Session,
    sink: &mut Sink<S>,
    source: &mut Source<S>,
) -> Exit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if !session.is_active() {
            return Exit::Local;
        }

        tokio::select! {
            _ = session.loop_wake().notified() => {
                if !session.is_active() {
                    return Exit::Local;
                }
                if let Err(e) = write_opportunity(session, sink).await {
                    debug!(session = session.id(), "write failed: {e}");
                    session.discontinue(DiscontinueReason::TransportError);
                    return Exit::Remote;
                }
                if session.wants_write() {
                    // Re-arm: the stored permit makes the next `notified()`
                    // complete immediately, interleaved with reads.
                    session.loop_wake().notify_one();
                }
            }

            frame = source.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    session.on_binary(data);
                }
                Some(Ok(Message::Pong(_))) => {
                    if session.on_pong() == PongOutcome::CloseNow {
                        return Exit::Local;
                    }
                }
                Some(Ok(Message::Ping(_))) => {
                    session.touch();
                    // tungstenite queues the pong; flush pushes it out now.
                    if sink.flush().await.is_err() {
                        session.discontinue(DiscontinueReason::TransportError);
                        return Exit::Remote;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    debug!(session = session.id(), len = text.len(), "ignoring text frame");
                    session.touch();
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(session = session.id(), ?frame, "peer closed");
                    // Keep reading: tungstenite answers the close and then
                    // ends the stream.
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Exit::Remote;
                }
                Some(Err(e)) => {
                    debug!(session = session.id(), "transport error: {e}");
                    session.discontinue(DiscontinueReason::TransportError);
                    return Exit::Remote;
                }
            },

            _ = ctx.stopped() => {
                session.discontinue(DiscontinueReason::Interrupted);
                return Exit::Local;
            }
        }
    }
}

/// Sends at most one frame: the next slice of the pending write, or a ping.
async fn write_opportunity<S>(session: &Session, sink: &mut Sink<S>) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match session.next_write(SEND_CONTENT) {
        Some(Outgoing::Data(chunk)) => {
            let len = chunk.len();
            sink.send(Message::Binary(chunk)).await?;
            session.data_flushed(len);
        }
        Some(Outgoing::Ping) => {
            let result = sink.send(Message::Ping(PING_PAYLOAD.to_vec())).await;
            session.ping_flushed(result.is_ok());
            result?;
        }
        None => {}
    }
    Ok(())
}

/// Closing handshake for a locally discontinued session.
///
/// A ping goes out first so that a peer stuck without traffic still sees a
/// frame, then the close frame.  Waits for the peer's close reply (or a pong,
/// which settles it as well) for at most [`CLOSE_WAIT`].
async fn close_gracefully<S>(session: &Session, sink: &mut Sink<S>, source: &mut Source<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(session = session.id(), "close me");
    let _ = sink.send(Message::Ping(PING_PAYLOAD.to_vec())).await;
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: CLOSE_REASON.into(),
    };
    if sink.send(Message::Close(Some(frame))).await.is_err() {
        return;
    }

    let replied = tokio::time::timeout(CLOSE_WAIT, async {
        while let Some(Ok(msg)) = source.next().await {
            if matches!(msg, Message::Close(_) | Message::Pong(_)) {
                break;
            }
        }
    })
    .await;
    if replied.is_err() {
        debug!(session = session.id(), "peer did not answer close");
    }
}

/// Gives the worker up to [`RECV_DRAIN_WAIT`] to consume queued input before
/// the queue is dropped.
async fn wait_recv_drained(session: &Session) {
    let deadline = Instant::now() + RECV_DRAIN_WAIT;
    while session.is_active() && session.queued_input() > 0 {
        if Instant::now() >= deadline {
            warn!(
                session = session.id(),
                bytes = session.queued_input(),
                "recv queue not empty at close"
            );
            return;
        }
        debug!(session = session.id(), "waiting recv");
        tokio::time::sleep(DRAIN_POLL).await;
    }
}
