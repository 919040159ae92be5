//! Remote operations: run `usbip` against a tunnelled session.
//!
//! `usbip` only speaks plain TCP.  For a remote operation we therefore:
//!
//! 1. open the WebSocket session ([`Client::open`]),
//! 2. listen on an ephemeral loopback port,
//! 3. start `usbip --tcp-port <port> ... --remote 127.0.0.1`,
//! 4. accept its connection and [`relay`] bytes between it and the session.
//!
//! `attach` differs from the rest: the tool hands its socket to the kernel
//! and exits, so the relay keeps running until the session ends or Ctrl+C.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::process::Child;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use usbws_bridge::infrastructure::service_interrupts;
use usbws_bridge::{Client, ClientConfig, ClientConnection};
use usbws_core::{relay, BlockingSocket};

use crate::tool::{UsbipCommand, UsbipTool};

/// Poll period while waiting for the tool to connect.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Opens a session with `config` and runs `command` over it.
///
/// # Errors
///
/// Connect failures, loopback socket failures and tool failures.
pub fn run_remote(
    config: ClientConfig,
    tool: &UsbipTool,
    command: &UsbipCommand,
) -> anyhow::Result<()> {
    let url = config.target.url.clone();
    let conn = Client::new(config)
        .open()
        .with_context(|| format!("failed to connect to {url}"))?;
    // Detached: the task ends on its own when the connection's Context stops.
    let _ = service_interrupts(conn.context());

    let result = relay_tool(&conn, tool, command);
    drop(conn);
    result
}

/// Runs `command` against an already open session.
///
/// # Errors
///
/// Loopback socket failures and tool failures.
pub fn relay_tool(
    conn: &ClientConnection,
    tool: &UsbipTool,
    command: &UsbipCommand,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind("127.0.0.1:0").context("failed to open loopback listener")?;
    let port = listener.local_addr()?.port();
    let mut child = tool.spawn(command, Some(port))?;
    debug!(port, "waiting for usbip to connect");

    let tcp = match accept_tool(&listener, &mut child, || conn.is_active()) {
        Ok(Some(tcp)) => tcp,
        Ok(None) => {
            // The tool finished without connecting; its status says why.
            let status = child.wait()?;
            conn.shutdown();
            return Ok(tool.check(status)?);
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("usbip did not connect");
        }
    };
    drop(listener);

    let keep_relaying = matches!(command, UsbipCommand::Attach { .. });
    thread::scope(|scope| -> anyhow::Result<()> {
        let pump = scope.spawn(|| relay(conn, tcp));

        let status = child.wait()?;
        if let Err(e) = tool.check(status) {
            conn.shutdown();
            let _ = pump.join();
            return Err(e.into());
        }

        if keep_relaying {
            info!("attached; relaying until the session ends (Ctrl+C to stop)");
        }
        match pump.join() {
            Ok(Ok(stats)) => debug!(
                to_tool = stats.to_tcp,
                to_session = stats.to_session,
                "relay finished"
            ),
            Ok(Err(e)) => warn!("relay failed: {e}"),
            Err(_) => warn!("relay thread panicked"),
        }
        Ok(())
    })
}

/// Waits for the tool's connection on `listener`.
///
/// Returns `Ok(None)` if the tool exits first.  Fails with
/// `ConnectionAborted` once `is_active` turns false.
pub fn accept_tool(
    listener: &TcpListener,
    child: &mut Child,
    is_active: impl Fn() -> bool,
) -> io::Result<Option<TcpStream>> {
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((tcp, addr)) => {
                debug!(%addr, "usbip connected");
                tcp.set_nonblocking(false)?;
                let _ = tcp.set_nodelay(true);
                return Ok(Some(tcp));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        if child.try_wait()?.is_some() {
            return Ok(None);
        }
        if !is_active() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session closed before usbip connected",
            ));
        }
        thread::sleep(ACCEPT_POLL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    fn listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").unwrap()
    }

    #[test]
    fn test_accept_returns_tool_connection() {
        // Arrange: a long-lived child and a "tool" that connects from a thread
        let listener = listener();
        let addr = listener.local_addr().unwrap();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let connector = thread::spawn(move || TcpStream::connect(addr).unwrap());

        // Act
        let accepted = accept_tool(&listener, &mut child, || true).unwrap();

        // Assert
        assert!(accepted.is_some());
        let _ = connector.join();
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_accept_returns_none_when_tool_exits() {
        let listener = listener();
        let mut child = Command::new("true").spawn().unwrap();

        let accepted = accept_tool(&listener, &mut child, || true).unwrap();

        assert!(accepted.is_none());
    }

    #[test]
    fn test_accept_fails_when_session_ends() {
        let listener = listener();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();

        let result = accept_tool(&listener, &mut child, || false);

        assert_eq!(
            result.unwrap_err().kind(),
            io::ErrorKind::ConnectionAborted
        );
        let _ = child.kill();
        let _ = child.wait();
    }
}
