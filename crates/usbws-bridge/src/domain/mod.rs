//! Domain layer for usbws-bridge.
//!
//! Pure configuration types with no I/O, no async and no sockets.  The
//! binaries populate them; the infrastructure layer reads them.

pub mod config;

pub use config::{resolve_port, ClientConfig, ServerConfig, TlsFiles};
