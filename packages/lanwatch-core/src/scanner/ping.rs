//! Reachability probes: system ping and TCP connect.

use super::hidden_command;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Ping a single host once using the system ping command.
///
/// `Ok(false)` means the host did not answer; `Err` means ping itself could
/// not be run (missing binary, sandbox), so callers should fall back to TCP.
pub async fn icmp_ping(ip: Ipv4Addr, timeout: Duration) -> io::Result<bool> {
    let ip_str = ip.to_string();

    let mut cmd = hidden_command("ping");

    #[cfg(target_os = "windows")]
    cmd.args(["-n", "1", "-w", &timeout.as_millis().to_string(), &ip_str]);

    #[cfg(target_os = "macos")]
    cmd.args(["-c", "1", "-t", &wait_secs(timeout), &ip_str]);

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    cmd.args(["-c", "1", "-W", &wait_secs(timeout), &ip_str]);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(output) => output?,
        // Child is killed on drop
        Err(_) => return Ok(false),
    };

    #[cfg(target_os = "windows")]
    {
        // Windows exits 0 for "Destination host unreachable" replies
        let text = String::from_utf8_lossy(&output.stdout).to_lowercase();
        Ok(text.contains("ttl="))
    }

    #[cfg(not(target_os = "windows"))]
    {
        Ok(output.status.success())
    }
}

/// Unix ping waits in whole seconds; the outer timeout enforces the real bound.
#[cfg(not(target_os = "windows"))]
fn wait_secs(timeout: Duration) -> String {
    timeout.as_secs().max(1).to_string()
}

/// Open a TCP connection to `ip:port` within `timeout`.
pub async fn tcp_connect(ip: Ipv4Addr, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addr = SocketAddr::from((ip, port));
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {} timed out", addr),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = tcp_connect(Ipv4Addr::LOCALHOST, port, Duration::from_secs(1)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = tcp_connect(Ipv4Addr::LOCALHOST, port, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
