//! # usbws-daemon
//!
//! Library half of the `usbwsd` binary.
//!
//! The daemon accepts WebSocket connections (optionally over TLS) and hands
//! every session to the local `usbipd` over plain TCP.  The heavy lifting
//! lives in `usbws-bridge`; this crate only adds what is specific to the
//! daemon process:
//!
//! - [`config`]: the optional TOML configuration file
//! - [`pidfile`]: the PID file written at startup
//! - [`service`]: session hooks that run one relay worker per session

pub mod config;
pub mod pidfile;
pub mod service;

pub use config::{load_config, ConfigError, DaemonConfig};
pub use pidfile::PidFile;
pub use service::ServiceHooks;
