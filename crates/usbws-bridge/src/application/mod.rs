//! Application layer for usbws-bridge.
//!
//! Holds the state shared by an event loop and the work running on top of
//! it: the [`Context`] (connection table, running flag, keepalive sweep) and
//! the [`SessionHooks`] seam.  Nothing here opens a socket.

pub mod context;
pub mod hooks;

pub use context::{Context, HEALTH_SWEEP};
pub use hooks::{Connection, ConnectionId, NoHooks, SessionHooks};
