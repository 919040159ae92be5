//! usbws: USB/IP over WebSocket client entry point.
//!
//! # Usage
//!
//! ```text
//! usbws connect    -u URL -b BUS-ID [remote options]
//! usbws disconnect -u URL -b BUS-ID [remote options]
//! usbws attach     -u URL -b BUS-ID [remote options]
//! usbws detach     -p PORT
//! usbws port
//! usbws list       -u URL [remote options] | -l [-p]
//! usbws bind       -b BUS-ID
//! usbws unbind     -b BUS-ID
//! usbws version
//!
//! Remote options:
//!   -u, --url <URL>             ws:// or wss:// URL of usbwsd
//!   -x, --proxy <HOST:PORT>     HTTP proxy
//!   -i, --interval <SECS>       Keepalive ping interval, 0 disables [default: 60]
//!   -k, --key <FILE>            Client private key
//!   -c, --cert <FILE>           Client certificate
//!       --ca <FILE>             Extra CA certificate for strict verification
//!   -V, --verification <MODE>   strict | relaxed (alias: none) [default: relaxed]
//! ```
//!
//! `-d/--debug` is accepted by every command.  The `usbip` program can be
//! replaced with `USBWS_USBIP` (useful for wrappers such as `sudo usbip`).

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use usbws_client::{execute, Command, UsbipTool};

/// USB/IP over WebSocket client.
#[derive(Debug, Parser)]
#[command(name = "usbws", about = "USB/IP over WebSocket client", version)]
struct Cli {
    /// Print debugging information.
    #[arg(short, long, global = true, env = "USBWS_DEBUG")]
    debug: bool,

    /// The usbip program to run.
    #[arg(long, global = true, value_name = "PROGRAM", default_value = "usbip", env = "USBWS_USBIP")]
    usbip: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Program entry point.
///
/// There is no Tokio runtime here: the client bootstrap starts its own
/// event-loop thread, and this thread stays free for blocking work (waiting
/// on the `usbip` process).
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    execute(&cli.command, &UsbipTool::new(cli.usbip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_after_subcommand() {
        let cli = Cli::parse_from(["usbws", "port", "-d"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Port));
    }

    #[test]
    fn test_default_program_is_usbip() {
        let cli = Cli::parse_from(["usbws", "version"]);
        assert_eq!(cli.usbip, PathBuf::from("usbip"));
        assert!(!cli.debug);
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["usbws", "frobnicate"]).is_err());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["usbws"]).is_err());
    }
}
