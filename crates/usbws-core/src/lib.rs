//! # usbws-core
//!
//! Shared library for the USB/IP-over-WebSocket tunnel.  It contains the
//! *session bridge*: the piece that makes a WebSocket connection look like an
//! ordinary blocking socket to code that only knows how to call `send` and
//! `recv`.
//!
//! # Architecture overview (for beginners)
//!
//! USB/IP normally runs over a plain TCP connection.  A WebSocket connection
//! can cross HTTP proxies and TLS terminators that a raw TCP connection
//! cannot, so this project carries the USB/IP byte stream inside WebSocket
//! binary frames.
//!
//! The difficulty is that the two sides think differently:
//!
//! - The WebSocket event loop is **asynchronous** and single-threaded.  It is
//!   told "a frame arrived" or "you may write now" and must never block.
//! - The USB/IP code is **blocking**.  It calls `recv(buf)` and expects the call
//!   to return only once the bytes are there.
//!
//! This crate sits between them:
//!
//! - **`session`** – The per-connection state machine.  The event loop pushes
//!   frames in and pulls write chunks out; a worker thread calls the blocking
//!   [`BlockingSocket`] methods.  It also holds the [`HealthMonitor`] that
//!   decides when an idle connection gets a ping or gets closed.
//!
//! - **`protocol`** – Wire constants (frame size, sub-protocol name, keepalive
//!   timings) and the parsing of connection targets (`ws://` / `wss://` URLs,
//!   HTTP proxy addresses, certificate verification modes).
//!
//! - **`relay`** – A blocking byte pump between a [`BlockingSocket`] and a TCP
//!   stream, used to hand a tunnelled session to the stock `usbip` tools.
//!
//! This crate knows nothing about WebSockets.  From Tokio it only borrows
//! `sync::Notify`, the handle a session uses to wake its event loop.

pub mod protocol;
pub mod relay;
pub mod session;

// Re-export the most-used types at the crate root so callers can write
// `usbws_core::Session` instead of `usbws_core::session::Session`.
pub use protocol::target::{ClientTarget, ProxyAddr, Scheme, TargetError, TlsMode, Verification};
pub use relay::{relay, RelayStats};
pub use session::error::{DiscontinueReason, SessionError};
pub use session::health::{HealthAction, HealthMonitor};
pub use session::socket::{BlockingSocket, PeerAddr};
pub use session::{Outgoing, PongOutcome, Session};
