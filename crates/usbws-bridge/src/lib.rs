//! usbws-bridge library crate.
//!
//! This crate runs the WebSocket side of the USB/IP tunnel: it accepts or
//! opens WebSocket connections, turns each one into a
//! [`Session`](usbws_core::Session), and hands the session to whatever
//! protocol engine the binary plugs in through [`SessionHooks`].
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! worker thread (blocking send/recv)
//!         ↕   usbws_core::Session
//! [usbws-bridge]
//!   ├── domain/           Pure types: ServerConfig, ClientConfig
//!   ├── application/      Context (connection table, hooks, health sweep)
//!   └── infrastructure/
//!         ├── connection/  Per-connection event loop driver
//!         ├── server/      Daemon accept loop + upgrade checks
//!         ├── client/      Client bootstrap (background loop thread)
//!         ├── proxy/       HTTP CONNECT tunnelling
//!         ├── tls/         rustls acceptor / connector configs
//!         └── interrupt/   Ctrl+C routing to the foreground Context
//!         ↕
//! peer  (WebSocket binary frames, optionally over TLS)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` owns shared state but never touches a socket.
//! - `infrastructure` depends on all other layers plus `tokio`,
//!   `tokio-tungstenite` and `rustls`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: the event-loop Context and lifecycle hooks.
pub mod application;

/// Infrastructure layer: sockets, TLS, WebSocket framing.
pub mod infrastructure;

pub mod error;

pub use application::{Connection, ConnectionId, Context, SessionHooks};
pub use domain::{ClientConfig, ServerConfig, TlsFiles};
pub use error::BridgeError;
pub use infrastructure::client::{Client, ClientConnection};
pub use infrastructure::server::Server;
