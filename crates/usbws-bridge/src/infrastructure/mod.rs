//! Infrastructure layer for usbws-bridge.
//!
//! Everything that touches a socket lives here:
//!
//! - accepting daemon connections and checking the upgrade request
//! - opening client connections, directly or through an HTTP proxy
//! - TLS configuration for both roles
//! - driving each established WebSocket against its session
//! - routing Ctrl+C to the foreground Context

pub mod client;
pub mod connection;
pub mod interrupt;
pub mod proxy;
pub mod server;
pub mod tls;

pub use client::{Client, ClientConnection};
pub use connection::drive;
pub use interrupt::service_interrupts;
pub use server::{Server, UpgradeCheck};
