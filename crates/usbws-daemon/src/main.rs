//! usbwsd: USB/IP over WebSocket daemon entry point.
//!
//! # Usage
//!
//! ```text
//! usbwsd [OPTIONS]
//!
//! Options:
//!   -d, --debug               Print debugging information
//!   -P, --pid [FILE]          Write process id to FILE [default: /var/run/usbwsd]
//!   -t, --tcp-port <PORT>     Listen on PORT [default: 80, 443 with --ssl]
//!   -p, --path <PATH>         URL path accepted for the upgrade [default: usbip]
//!   -i, --interval <SECS>     Keepalive ping interval, 0 disables [default: 60]
//!   -s, --ssl                 Serve wss:// with the key and certificate below
//!   -k, --key <FILE>          Private key [default: cert/server.key]
//!   -c, --cert <FILE>         Certificate chain [default: cert/server.crt]
//!       --usbipd <ADDR>       usbipd to relay to [default: 127.0.0.1:3240]
//!       --bind <IP>           Address to listen on [default: 0.0.0.0]
//!       --config <FILE>       TOML configuration file
//! ```
//!
//! Every option also reads a `USBWS_*` environment variable.  Precedence is
//! command line, then environment, then config file, then built-in default.
//!
//! # Architecture overview
//!
//! ```text
//! usbws client  (WebSocket binary frames, optionally TLS)
//!       ↕
//! usbwsd  ← this process
//!   one current-thread Tokio runtime: accept loop, connection drivers,
//!   keepalive sweep, Ctrl+C routing
//!   one worker thread per session: blocking relay
//!       ↕
//! usbipd  (plain TCP, 127.0.0.1:3240)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use usbws_bridge::infrastructure::service_interrupts;
use usbws_bridge::{Context, Server};
use usbws_core::HealthMonitor;
use usbws_daemon::pidfile::DEFAULT_PID_FILE;
use usbws_daemon::{load_config, DaemonConfig, PidFile, ServiceHooks};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// USB/IP over WebSocket daemon.
#[derive(Debug, Parser)]
#[command(name = "usbwsd", about = "USB/IP over WebSocket daemon", version)]
struct Cli {
    /// Print debugging information.
    #[arg(short, long, env = "USBWS_DEBUG")]
    debug: bool,

    /// Write the process id to FILE.
    #[arg(
        short = 'P',
        long,
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = DEFAULT_PID_FILE,
        env = "USBWS_PID"
    )]
    pid: Option<PathBuf>,

    /// TCP port to listen on; 0 picks 80, or 443 with `--ssl`.
    #[arg(short, long, value_name = "PORT", env = "USBWS_TCP_PORT")]
    tcp_port: Option<u16>,

    /// URL path accepted for the WebSocket upgrade.
    #[arg(short, long, env = "USBWS_PATH")]
    path: Option<String>,

    /// Keepalive ping interval in seconds; 0 disables keepalive.
    #[arg(short, long, value_name = "SECS", env = "USBWS_INTERVAL")]
    interval: Option<u64>,

    /// Serve wss:// using `--key` and `--cert`.
    #[arg(short, long, env = "USBWS_SSL")]
    ssl: bool,

    /// PEM private key.
    #[arg(short, long, value_name = "FILE", env = "USBWS_KEY")]
    key: Option<PathBuf>,

    /// PEM certificate chain.
    #[arg(short, long, value_name = "FILE", env = "USBWS_CERT")]
    cert: Option<PathBuf>,

    /// `host:port` of the usbipd every session is relayed to.
    #[arg(long, value_name = "ADDR", env = "USBWS_USBIPD")]
    usbipd: Option<String>,

    /// IP address to listen on.
    #[arg(long, value_name = "IP", env = "USBWS_BIND")]
    bind: Option<String>,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE", env = "USBWS_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Applies every option given on the command line on top of `file`.
    fn apply(&self, mut file: DaemonConfig) -> DaemonConfig {
        if let Some(port) = self.tcp_port {
            file.listen.port = port;
        }
        if let Some(path) = &self.path {
            file.listen.path = path.clone();
        }
        if let Some(interval) = self.interval {
            file.listen.interval = interval;
        }
        if let Some(bind) = &self.bind {
            file.listen.bind = bind.clone();
        }
        if self.ssl {
            file.tls.enabled = true;
        }
        if let Some(key) = &self.key {
            file.tls.key = key.clone();
        }
        if let Some(cert) = &self.cert {
            file.tls.cert = cert.clone();
        }
        if let Some(usbipd) = &self.usbipd {
            file.upstream.usbipd = usbipd.clone();
        }
        file
    }

    /// Reads the config file (if any) and applies the command line.
    fn daemon_config(&self) -> anyhow::Result<DaemonConfig> {
        let file = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => DaemonConfig::default(),
        };
        Ok(self.apply(file))
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// The daemon runs a single-threaded Tokio runtime: the event loop never
/// blocks, so one thread drives every connection.  Blocking relay work runs
/// on the per-session worker threads instead.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = cli.daemon_config()?;
    let server_config = config.server_config()?;

    let _pid_file = cli
        .pid
        .as_ref()
        .map(|path| {
            PidFile::create(path)
                .with_context(|| format!("failed to write pid file {}", path.display()))
        })
        .transpose()?;

    let hooks = Arc::new(ServiceHooks::new(config.upstream.usbipd.clone()));
    let ctx = Context::new(HealthMonitor::new(server_config.keepalive), hooks);
    ctx.attach_runtime(tokio::runtime::Handle::current());
    let interrupts = service_interrupts(&ctx);

    info!(
        usbipd = %config.upstream.usbipd,
        keepalive = ?server_config.keepalive,
        "usbwsd starting"
    );
    let server = Server::bind(&server_config).await?;
    let result = server.run(ctx.clone()).await;

    ctx.stop();
    if let Some(task) = interrupts {
        let _ = task.await;
    }
    ctx.detach_runtime();

    info!("usbwsd stopped");
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
