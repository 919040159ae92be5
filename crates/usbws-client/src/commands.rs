//! `usbws` sub-commands.
//!
//! Remote commands (`connect`, `disconnect`, `attach`, `list -u`) open a
//! WebSocket session and relay the `usbip` tool over it.  Local commands
//! (`detach`, `port`, `list -l`, `bind`, `unbind`) run the tool directly.
//!
//! Required options are declared optional in clap and checked here, so that
//! the error text matches the classic tool (`missing url`, `missing bus-id`,
//! ...).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use thiserror::Error;

use usbws_bridge::{ClientConfig, TlsFiles};
use usbws_core::protocol::PING_PONG_DEFAULT;
use usbws_core::Verification;

use crate::remote::run_remote;
use crate::tool::{UsbipCommand, UsbipTool};

/// A required option was not given.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("missing url")]
    MissingUrl,
    #[error("missing bus-id")]
    MissingBusId,
    #[error("missing port")]
    MissingPort,
    #[error("missing url and local")]
    MissingUrlAndLocal,
}

// ── Argument groups ───────────────────────────────────────────────────────────

/// Options shared by every command that opens a session.
#[derive(Debug, Clone, Args)]
pub struct RemoteArgs {
    /// URL of the daemon, e.g. `wss://host/usbip`.
    #[arg(short, long, env = "USBWS_URL")]
    pub url: Option<String>,

    /// HTTP proxy (`host:port` or `http://host:port/`).
    #[arg(short = 'x', long, env = "USBWS_PROXY")]
    pub proxy: Option<String>,

    /// Keepalive ping interval in seconds; 0 disables keepalive.
    #[arg(short, long, value_name = "SECS", default_value_t = PING_PONG_DEFAULT.as_secs())]
    pub interval: u64,

    /// Client private key (PEM).
    #[arg(short, long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Client certificate (PEM).
    #[arg(short, long, value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// Extra CA certificate for strict verification.
    #[arg(long, value_name = "FILE")]
    pub ca: Option<PathBuf>,

    /// Server certificate verification: strict, or relaxed (`none` is an
    /// alias of relaxed).
    #[arg(short = 'V', long, value_name = "MODE", default_value = "relaxed")]
    pub verification: Verification,
}

impl RemoteArgs {
    /// Builds the connection settings.
    ///
    /// # Errors
    ///
    /// [`UsageError::MissingUrl`] without `--url`; target errors for a bad
    /// URL or proxy.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let url = self.url.as_deref().ok_or(UsageError::MissingUrl)?;
        let mut config = ClientConfig::new(url)?
            .with_proxy(self.proxy.as_deref())?
            .with_keepalive(Duration::from_secs(self.interval))
            .with_verification(self.verification);
        config.ca_file = self.ca.clone();
        if self.key.is_some() || self.cert.is_some() {
            let defaults = TlsFiles::default();
            config.client_auth = Some(TlsFiles {
                key: self.key.clone().unwrap_or(defaults.key),
                cert: self.cert.clone().unwrap_or(defaults.cert),
            });
        }
        Ok(config)
    }
}

/// A remote command on one device.
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Bus id of the device, e.g. `1-1`.
    #[arg(short, long = "bus-id", value_name = "BUS-ID")]
    pub bus_id: Option<String>,
}

impl DeviceArgs {
    fn bus_id(&self) -> Result<String, UsageError> {
        self.bus_id.clone().ok_or(UsageError::MissingBusId)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// List local devices instead of the daemon's.
    #[arg(short, long)]
    pub local: bool,

    /// Machine-readable output (local listing only).
    #[arg(short, long)]
    pub parsable: bool,
}

#[derive(Debug, Clone, Args)]
pub struct BindArgs {
    /// Bus id of the local device.
    #[arg(short, long = "bus-id", value_name = "BUS-ID")]
    pub bus_id: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct DetachArgs {
    /// vhci port of the imported device (see `usbws port`).
    #[arg(short, long)]
    pub port: Option<String>,
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Export a local device to the daemon side.
    Connect(DeviceArgs),
    /// Withdraw a device exported with `connect`.
    Disconnect(DeviceArgs),
    /// Import a device from the daemon and keep the session open.
    Attach(DeviceArgs),
    /// Release an imported device.
    Detach(DetachArgs),
    /// Show imported devices.
    Port,
    /// List devices, on the daemon (`-u`) or locally (`-l`).
    List(ListArgs),
    /// Bind a local device to usbip-host.
    Bind(BindArgs),
    /// Unbind a local device from usbip-host.
    Unbind(BindArgs),
    /// Print the version.
    Version,
}

/// What a [`Command`] resolves to once its arguments are checked.
#[derive(Debug, Clone)]
pub enum Plan {
    Remote(ClientConfig, UsbipCommand),
    Local(UsbipCommand),
    Version,
}

impl Command {
    /// Checks the arguments and decides how to run the command.
    ///
    /// # Errors
    ///
    /// A [`UsageError`] for a missing required option, or a target error for
    /// an invalid URL or proxy.
    pub fn plan(&self) -> anyhow::Result<Plan> {
        let plan = match self {
            Command::Connect(args) => {
                let config = args.remote.client_config()?;
                Plan::Remote(config, UsbipCommand::Connect { busid: args.bus_id()? })
            }
            Command::Disconnect(args) => {
                let config = args.remote.client_config()?;
                Plan::Remote(config, UsbipCommand::Disconnect { busid: args.bus_id()? })
            }
            Command::Attach(args) => {
                let config = args.remote.client_config()?;
                Plan::Remote(config, UsbipCommand::Attach { busid: args.bus_id()? })
            }
            Command::Detach(args) => Plan::Local(UsbipCommand::Detach {
                port: args.port.clone().ok_or(UsageError::MissingPort)?,
            }),
            Command::Port => Plan::Local(UsbipCommand::Port),
            Command::List(args) if args.local => Plan::Local(UsbipCommand::List {
                local: true,
                parsable: args.parsable,
            }),
            Command::List(args) => {
                if args.remote.url.is_none() {
                    return Err(UsageError::MissingUrlAndLocal.into());
                }
                Plan::Remote(
                    args.remote.client_config()?,
                    UsbipCommand::List {
                        local: false,
                        parsable: args.parsable,
                    },
                )
            }
            Command::Bind(args) => Plan::Local(UsbipCommand::Bind {
                busid: args.bus_id.clone().ok_or(UsageError::MissingBusId)?,
            }),
            Command::Unbind(args) => Plan::Local(UsbipCommand::Unbind {
                busid: args.bus_id.clone().ok_or(UsageError::MissingBusId)?,
            }),
            Command::Version => Plan::Version,
        };
        Ok(plan)
    }
}

/// Runs `command` with `tool`.
///
/// # Errors
///
/// Usage errors, connect failures and tool failures.
pub fn execute(command: &Command, tool: &UsbipTool) -> anyhow::Result<()> {
    match command.plan()? {
        Plan::Remote(config, op) => run_remote(config, tool, &op),
        Plan::Local(op) => Ok(tool.run(&op)?),
        Plan::Version => {
            println!("usbws {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Command {
        let mut argv = vec!["usbws"];
        argv.extend_from_slice(args);
        Harness::parse_from(argv).command
    }

    fn usage_error(args: &[&str]) -> UsageError {
        parse(args)
            .plan()
            .unwrap_err()
            .downcast::<UsageError>()
            .unwrap()
    }

    #[test]
    fn test_attach_requires_url_then_bus_id() {
        assert_eq!(usage_error(&["attach", "-b", "1-1"]), UsageError::MissingUrl);
        assert_eq!(
            usage_error(&["attach", "-u", "ws://host/usbip"]),
            UsageError::MissingBusId
        );
    }

    #[test]
    fn test_list_requires_url_or_local() {
        assert_eq!(usage_error(&["list"]), UsageError::MissingUrlAndLocal);
    }

    #[test]
    fn test_detach_requires_port() {
        assert_eq!(usage_error(&["detach"]), UsageError::MissingPort);
    }

    #[test]
    fn test_bind_requires_bus_id() {
        assert_eq!(usage_error(&["bind"]), UsageError::MissingBusId);
        assert_eq!(usage_error(&["unbind"]), UsageError::MissingBusId);
    }

    #[test]
    fn test_attach_plan_carries_connection_settings() {
        // Arrange
        let command = parse(&[
            "attach",
            "-u",
            "wss://daemon.example/usbip",
            "-x",
            "http://proxy.example:3128/",
            "-i",
            "30",
            "-V",
            "strict",
            "-b",
            "2-1.4",
        ]);

        // Act
        let plan = command.plan().unwrap();

        // Assert
        let Plan::Remote(config, op) = plan else {
            panic!("expected a remote plan");
        };
        assert_eq!(op, UsbipCommand::Attach { busid: "2-1.4".to_string() });
        assert_eq!(config.target.port, 443);
        assert_eq!(config.proxy.unwrap().to_string(), "proxy.example:3128");
        assert_eq!(config.keepalive, Duration::from_secs(30));
        assert_eq!(config.verification, Verification::Strict);
        assert!(config.client_auth.is_none());
    }

    #[test]
    fn test_verification_none_is_relaxed() {
        let command = parse(&["list", "-u", "wss://h/usbip", "-V", "none"]);
        let Plan::Remote(config, _) = command.plan().unwrap() else {
            panic!("expected a remote plan");
        };
        assert_eq!(config.verification, Verification::Relaxed);
    }

    #[test]
    fn test_client_key_alone_uses_default_cert() {
        let command = parse(&["connect", "-u", "wss://h/usbip", "-b", "1-1", "-k", "me.key"]);
        let Plan::Remote(config, _) = command.plan().unwrap() else {
            panic!("expected a remote plan");
        };
        let auth = config.client_auth.unwrap();
        assert_eq!(auth.key, PathBuf::from("me.key"));
        assert_eq!(auth.cert, PathBuf::from("cert/server.crt"));
    }

    #[test]
    fn test_local_list_runs_directly() {
        let plan = parse(&["list", "-l", "-p"]).plan().unwrap();
        assert!(matches!(
            plan,
            Plan::Local(UsbipCommand::List { local: true, parsable: true })
        ));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = parse(&["list", "-u", "http://host/usbip"]).plan();
        assert!(result.is_err());
    }

    #[test]
    fn test_version_plan() {
        assert!(matches!(parse(&["version"]).plan().unwrap(), Plan::Version));
    }
}
