//! Port scanning over a fixed non-intrusive port set, plus banner reads.

use super::ping::tcp_connect;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Ports probed on every reachable host. Connect-only; nothing is written.
pub const SAFE_PORTS: [u16; 11] = [22, 80, 443, 445, 554, 3389, 5555, 8080, 8443, 161, 53];

const BANNER_MAX_BYTES: usize = 256;

/// Read whatever the service volunteers right after connecting.
pub async fn grab_banner(ip: Ipv4Addr, port: u16, timeout: Duration) -> Option<String> {
    let mut stream = tcp_connect(ip, port, timeout).await.ok()?;
    let mut buf = [0u8; BANNER_MAX_BYTES];
    let read = match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        _ => return None,
    };
    clean_banner(&buf[..read])
}

/// Printable single-line form of a raw banner.
pub fn clean_banner(raw: &[u8]) -> Option<String> {
    let text: String = String::from_utf8_lossy(raw)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}
