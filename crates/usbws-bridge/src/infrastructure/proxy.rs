//! HTTP `CONNECT` tunnelling through a forward proxy.
//!
//! ```text
//! client ── CONNECT daemon:443 HTTP/1.1 ──▶ proxy
//!        ◀── HTTP/1.1 200 Connection established
//!        ══ raw bytes (TLS + WebSocket) ══▶ daemon
//! ```
//!
//! After a 2xx reply the TCP stream is a transparent pipe to the daemon and
//! the TLS/WebSocket handshakes run over it as if connected directly.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use usbws_core::ProxyAddr;

use crate::error::BridgeError;

/// Largest proxy response head accepted.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Opens a TCP connection to `proxy` and asks it to tunnel to `authority`
/// (`host:port`).
///
/// # Errors
///
/// - [`BridgeError::Connect`] if the proxy cannot be reached.
/// - [`BridgeError::Proxy`] if it answers with anything but a 2xx status.
pub async fn tunnel(proxy: &ProxyAddr, authority: &str) -> Result<TcpStream, BridgeError> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(|source| BridgeError::Connect {
            addr: proxy.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;

    let request = connect_request(authority);
    stream.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut stream).await.map_err(|reason| BridgeError::Proxy {
        proxy: proxy.to_string(),
        reason,
    })?;
    let status = parse_status(&head).map_err(|reason| BridgeError::Proxy {
        proxy: proxy.to_string(),
        reason,
    })?;
    if !(200..300).contains(&status) {
        return Err(BridgeError::Proxy {
            proxy: proxy.to_string(),
            reason: format!("tunnel refused with status {status}"),
        });
    }

    debug!(%proxy, %authority, "proxy tunnel established");
    Ok(stream)
}

fn connect_request(authority: &str) -> String {
    format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: keep-alive\r\n\r\n")
}

/// Reads up to and including the blank line ending the response head.
/// Reads byte by byte so nothing after the head is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, String> {
    let mut head = Vec::with_capacity(256);
    loop {
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| format!("connection lost during CONNECT: {e}"))?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err("response head too large".to_string());
        }
    }
    String::from_utf8(head).map_err(|_| "response head is not valid UTF-8".to_string())
}

/// Extracts the status code from `HTTP/1.x NNN reason`.
fn parse_status(head: &str) -> Result<u16, String> {
    let line = head.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| format!("bad status line '{line}'")),
        _ => Err(format!("bad status line '{line}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_connect_request_format() {
        assert_eq!(
            connect_request("usb.example:443"),
            "CONNECT usb.example:443 HTTP/1.1\r\nHost: usb.example:443\r\nProxy-Connection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status("HTTP/1.1 200 Connection established\r\n\r\n"), Ok(200));
        assert_eq!(parse_status("HTTP/1.0 407 Proxy Auth Required\r\n"), Ok(407));
        assert!(parse_status("SSH-2.0-OpenSSH\r\n").is_err());
        assert!(parse_status("").is_err());
    }

    /// Fake proxy: reads the CONNECT head, answers with `reply`, then echoes.
    async fn spawn_fake_proxy(reply: &'static str) -> (ProxyAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let head = read_response_head(&mut sock).await.unwrap();
            sock.write_all(reply.as_bytes()).await.unwrap();
            let mut buf = [0u8; 5];
            if sock.read_exact(&mut buf).await.is_ok() {
                sock.write_all(&buf).await.unwrap();
            }
            head
        });
        (
            ProxyAddr {
                host: "127.0.0.1".to_string(),
                port,
            },
            handle,
        )
    }

    #[tokio::test]
    async fn test_tunnel_through_accepting_proxy() {
        // Arrange
        let (proxy, handle) = spawn_fake_proxy("HTTP/1.1 200 Connection established\r\n\r\n").await;

        // Act
        let mut stream = tunnel(&proxy, "daemon.local:80").await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        stream.read_exact(&mut echoed).await.unwrap();

        // Assert
        assert_eq!(&echoed, b"hello");
        let request = handle.await.unwrap();
        assert!(request.starts_with("CONNECT daemon.local:80 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_tunnel_refused_by_proxy() {
        let (proxy, _handle) = spawn_fake_proxy("HTTP/1.1 403 Forbidden\r\n\r\n").await;

        let result = tunnel(&proxy, "daemon.local:80").await;

        assert!(matches!(result, Err(BridgeError::Proxy { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_connect_error() {
        // Arrange: grab a free port and close it again
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let proxy = ProxyAddr {
            host: "127.0.0.1".to_string(),
            port,
        };

        // Act
        let result = tunnel(&proxy, "daemon.local:80").await;

        // Assert
        assert!(matches!(result, Err(BridgeError::Connect { .. })));
    }
}
