//! # usbws-client
//!
//! Library half of the `usbws` command.
//!
//! The client never speaks USB/IP itself.  For remote operations it opens a
//! WebSocket session to `usbwsd`, exposes it on a loopback TCP port and lets
//! the stock `usbip` tool talk through it:
//!
//! ```text
//! usbip ──TCP 127.0.0.1:<ephemeral>── usbws ══WebSocket══ usbwsd ── usbipd
//! ```
//!
//! - [`commands`]: the sub-commands and their argument checks
//! - [`remote`]: loopback listener, tool process and relay
//! - [`tool`]: argument building and process handling for `usbip`

pub mod commands;
pub mod remote;
pub mod tool;

pub use commands::{execute, Command, UsageError};
pub use tool::{ToolError, UsbipCommand, UsbipTool};
