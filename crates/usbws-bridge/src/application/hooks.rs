//! Session lifecycle hooks.
//!
//! The bridge does not know what runs on top of a session.  The binary that
//! owns a [`Context`] supplies a [`SessionHooks`] implementation:
//!
//! - the **daemon** starts a worker thread per session and joins it again;
//! - the **client** reports "connected" / "failed" to the thread waiting in
//!   `Client::open` and stops its private Context when the connection ends.
//!
//! Hooks run on the event loop thread and must not block.

use std::sync::Arc;

use usbws_core::{PeerAddr, Session};

use super::context::Context;

/// Identifier of one transport connection within a [`Context`].
pub type ConnectionId = u64;

/// What a hook sees of a connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: PeerAddr,
    /// `None` when the connection failed before a session existed.
    pub session: Option<Arc<Session>>,
}

/// Callbacks invoked by the event loop around each session.
pub trait SessionHooks: Send + Sync + 'static {
    /// A session became Active.  An error closes the connection.
    fn on_session_start(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()>;

    /// The connection is gone (or never came up).  The session, if any, is
    /// already discontinued.
    fn on_session_stop(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()>;
}

/// Hooks that do nothing.  Useful for tests and for tooling that drives
/// sessions directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {
    fn on_session_start(&self, _ctx: &Context, _conn: &Connection) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_session_stop(&self, _ctx: &Context, _conn: &Connection) -> anyhow::Result<()> {
        Ok(())
    }
}
