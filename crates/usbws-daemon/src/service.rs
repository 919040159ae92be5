//! Daemon session hooks: one worker thread per session relaying to usbipd.
//!
//! # Lifecycle of a worker (for beginners)
//!
//! 1. The event loop accepts a WebSocket and calls
//!    [`SessionHooks::on_session_start`].
//! 2. The hook spawns a named OS thread.  That thread opens a plain TCP
//!    connection to the local `usbipd` and runs [`usbws_core::relay`]
//!    between it and the session.  All blocking happens on this thread,
//!    never on the event loop.
//! 3. When the WebSocket closes, the event loop discontinues the session,
//!    which wakes the worker's blocked `recv`/`send`.  The relay then shuts
//!    the usbipd connection and the thread ends.
//! 4. [`SessionHooks::on_session_stop`] reaps the thread: inline if it has
//!    already finished, otherwise on Tokio's blocking pool so the event loop
//!    is never held up by a join.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use usbws_bridge::{Connection, ConnectionId, Context, SessionHooks};
use usbws_core::{relay, BlockingSocket, Session};

/// Hooks that attach every daemon session to usbipd.
#[derive(Debug)]
pub struct ServiceHooks {
    usbipd: String,
    workers: Mutex<HashMap<ConnectionId, JoinHandle<()>>>,
}

impl ServiceHooks {
    /// `usbipd` is the `host:port` each worker connects to.
    pub fn new(usbipd: impl Into<String>) -> Self {
        Self {
            usbipd: usbipd.into(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of worker threads not yet reaped.
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl SessionHooks for ServiceHooks {
    fn on_session_start(&self, _ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
        let session = conn
            .session
            .clone()
            .ok_or_else(|| anyhow::anyhow!("connection {} has no session", conn.id))?;
        let usbipd = self.usbipd.clone();

        let worker = thread::Builder::new()
            .name(format!("usbws-worker-{}", conn.id))
            .spawn(move || serve(&session, &usbipd))?;

        info!(peer = %conn.peer, id = conn.id, "session started");
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn.id, worker);
        Ok(())
    }

    fn on_session_stop(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
        let worker = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn.id);
        let Some(worker) = worker else {
            return Ok(());
        };

        if worker.is_finished() {
            reap(conn.id, worker);
        } else if let Some(runtime) = ctx.runtime() {
            let id = conn.id;
            runtime.spawn_blocking(move || reap(id, worker));
        } else {
            debug!(id = conn.id, "no runtime to reap worker; detaching it");
        }
        info!(peer = %conn.peer, id = conn.id, "session stopped");
        Ok(())
    }
}

/// Worker body: relay `session` to usbipd until either side closes.
fn serve(session: &Arc<Session>, usbipd: &str) {
    let peer = session.peer();
    let tcp = match TcpStream::connect(usbipd) {
        Ok(tcp) => tcp,
        Err(e) => {
            warn!(%peer, usbipd, "failed to connect to usbipd: {e}");
            session.shutdown();
            return;
        }
    };
    let _ = tcp.set_nodelay(true);
    debug!(%peer, usbipd, "relaying to usbipd");

    match relay(session.as_ref(), tcp) {
        Ok(stats) => info!(
            %peer,
            to_usbipd = stats.to_tcp,
            to_client = stats.to_session,
            "relay finished"
        ),
        Err(e) => {
            warn!(%peer, "relay failed: {e}");
            session.shutdown();
        }
    }
}

fn reap(id: ConnectionId, worker: JoinHandle<()>) {
    if worker.join().is_err() {
        warn!(id, "worker thread panicked");
    }
}
