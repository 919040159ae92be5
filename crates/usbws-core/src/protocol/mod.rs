//! Wire-level constants and connection-target parsing.
//!
//! The tunnel has no framing of its own: every WebSocket *binary* frame
//! carries a slice of the USB/IP byte stream, and the receiver simply
//! concatenates them.  The only other frames used are the standard
//! ping/pong/close control frames.

use std::time::Duration;

pub mod target;

/// WebSocket sub-protocol offered by the client and echoed by the daemon.
pub const PROTOCOL: &str = "usbip";

/// Maximum payload carried by a single outgoing binary frame, in bytes.
///
/// A `send` of more than this many bytes is split over several frames.
pub const SEND_CONTENT: usize = 1500;

/// Payload of every keepalive ping (a single `?` byte).
pub const PING_PAYLOAD: &[u8] = b"?";

/// Reason text carried by the close frame of a graceful close.
pub const CLOSE_REASON: &str = "!";

/// Default keepalive interval.  `0` on the command line disables keepalive.
pub const PING_PONG_DEFAULT: Duration = Duration::from_secs(60);

/// How long past the keepalive interval a silent peer is tolerated before
/// the session is discontinued.
pub const PING_PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra slack the client adds to the keepalive interval so that, with equal
/// settings on both ends, the daemon is the one that pings.
pub const CLIENT_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound on how long a closing session waits for the worker to consume
/// already-queued fragments.
pub const RECV_DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Default URL path the daemon serves.
pub const DEFAULT_PATH: &str = "usbip";

/// Default port of a local `usbipd`.
pub const USBIP_PORT: u16 = 3240;
