//! Blocking byte pump between a tunnelled session and a TCP stream.
//!
//! The shipped protocol engines are not re-implementations of USB/IP: the
//! daemon hands each session to a local `usbipd`, and the client hands it to
//! the `usbip` command, both over plain TCP.  [`relay`] joins the two with
//! two threads, one per direction:
//!
//! ```text
//!   session.recv(all = false) ──▶ tcp.write_all
//!   tcp.read                  ──▶ session.send
//! ```
//!
//! When either side ends, the other is shut down too, and the session is
//! always shut down before `relay` returns.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;

use tracing::debug;

use crate::protocol::SEND_CONTENT;
use crate::session::socket::BlockingSocket;

const TCP_READ_BUF: usize = 16 * 1024;

/// Byte counts moved by one [`relay`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes read from the session and written to TCP.
    pub to_tcp: u64,
    /// Bytes read from TCP and sent over the session.
    pub to_session: u64,
}

/// Copies bytes both ways until either side closes.
///
/// # Errors
///
/// Returns an error only if the TCP stream cannot be cloned for the second
/// direction.  Transfer errors end the relay normally; they are the usual
/// way a connection finishes.
pub fn relay<S>(socket: &S, tcp: TcpStream) -> io::Result<RelayStats>
where
    S: BlockingSocket + ?Sized,
{
    let mut tcp_reader = tcp.try_clone()?;
    let mut tcp_writer = tcp;
    let peer = socket.peer();

    let stats = thread::scope(|scope| {
        let downstream = scope.spawn(|| {
            let mut moved = 0u64;
            let mut buf = vec![0u8; SEND_CONTENT];
            loop {
                let n = match socket.recv(&mut buf, false) {
                    Ok(n) => n,
                    Err(e) => {
                        debug!(%peer, "session side ended: {e}");
                        break;
                    }
                };
                if let Err(e) = tcp_writer.write_all(&buf[..n]) {
                    debug!(%peer, "tcp write failed: {e}");
                    socket.shutdown();
                    break;
                }
                moved += n as u64;
            }
            let _ = tcp_writer.shutdown(Shutdown::Both);
            moved
        });

        let mut moved = 0u64;
        let mut buf = vec![0u8; TCP_READ_BUF];
        loop {
            let n = match tcp_reader.read(&mut buf) {
                Ok(0) => {
                    debug!(%peer, "tcp side closed");
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(%peer, "tcp read failed: {e}");
                    break;
                }
            };
            if let Err(e) = socket.send(&buf[..n]) {
                debug!(%peer, "session send failed: {e}");
                break;
            }
            moved += n as u64;
        }
        socket.shutdown();

        RelayStats {
            to_tcp: downstream.join().unwrap_or_default(),
            to_session: moved,
        }
    });

    debug!(
        %peer,
        to_tcp = stats.to_tcp,
        to_session = stats.to_session,
        "relay finished"
    );
    Ok(stats)
}
