//! ARP / neighbor table reading.
//!
//! Linux exposes the table at `/proc/net/arp`; other platforms are read
//! through `arp -a`.

use super::hidden_command;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Snapshot of the system's IP to MAC cache.
#[derive(Debug, Clone, Default)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, String>,
}

impl ArpTable {
    pub fn new(entries: HashMap<Ipv4Addr, String>) -> Self {
        Self { entries }
    }

    /// MAC recorded for `ip`, in `AA:BB:CC:DD:EE:FF` form.
    pub fn mac_for(&self, ip: Ipv4Addr) -> Option<&str> {
        self.entries.get(&ip).map(String::as_str)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.entries.contains_key(&ip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Ipv4Addr, String)> for ArpTable {
    fn from_iter<I: IntoIterator<Item = (Ipv4Addr, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Read the system ARP table. Failures yield an empty table.
pub async fn read_arp_table() -> ArpTable {
    #[cfg(target_os = "linux")]
    {
        match tokio::fs::read_to_string("/proc/net/arp").await {
            Ok(content) => return parse_proc_net_arp(&content),
            Err(e) => tracing::debug!("Failed to read /proc/net/arp: {}, trying arp -a", e),
        }
    }

    match hidden_command("arp").arg("-a").output().await {
        Ok(output) => parse_arp_a(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            tracing::debug!("Failed to run arp -a: {}", e);
            ArpTable::default()
        }
    }
}

/// Parse `/proc/net/arp`: header line, then `IP HWtype Flags HWaddr Mask Device`.
pub fn parse_proc_net_arp(content: &str) -> ArpTable {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let ip = parts[0].parse::<Ipv4Addr>().ok()?;
            let mac = normalize_arp_mac(parts[3])?;
            Some((ip, mac))
        })
        .collect()
}

/// Parse `arp -a` output in either the BSD/macOS form
/// `host (192.168.1.1) at 0:1a:2b:3c:4d:5e on en0` or the Windows form
/// `192.168.1.1   00-1a-2b-3c-4d-5e   dynamic`.
pub fn parse_arp_a(content: &str) -> ArpTable {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if let (Some(open), Some(close), Some(at)) =
                (line.find('('), line.find(')'), line.find(" at "))
            {
                if open < close && close < at {
                    let ip = line[open + 1..close].parse::<Ipv4Addr>().ok()?;
                    let mac = line[at + 4..].split_whitespace().next()?;
                    return Some((ip, normalize_arp_mac(mac)?));
                }
            }

            let mut parts = line.split_whitespace();
            let ip = parts.next()?.parse::<Ipv4Addr>().ok()?;
            if ip.is_multicast() {
                return None;
            }
            let mac = normalize_arp_mac(parts.next()?)?;
            Some((ip, mac))
        })
        .collect()
}

/// Canonical upper-case colon form. Single-digit octets (as printed by
/// macOS) are zero padded. Incomplete, all-zero and broadcast entries are
/// rejected.
fn normalize_arp_mac(raw: &str) -> Option<String> {
    let octets: Vec<&str> = raw.split([':', '-']).collect();
    if octets.len() != 6 {
        return None;
    }
    let mut out = Vec::with_capacity(6);
    for octet in octets {
        if octet.is_empty() || octet.len() > 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        out.push(format!("{:0>2}", octet.to_uppercase()));
    }
    let mac = out.join(":");
    if mac == "00:00:00:00:00:00" || mac == "FF:FF:FF:FF:FF:FF" {
        return None;
    }
    Some(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_net_arp() {
        let content = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:91:b1:00:11:22     *        eth0
192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.60     0x1         0x2         b8:27:eb:aa:bb:cc     *        eth0
";
        let table = parse_proc_net_arp(content);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.mac_for(Ipv4Addr::new(192, 168, 1, 1)),
            Some("A4:91:B1:00:11:22")
        );
        assert!(!table.contains(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[test]
    fn test_parse_arp_a_macos() {
        let content = "\
? (192.168.1.1) at 0:1a:2b:3c:4d:5e on en0 ifscope [ethernet]
router.lan (192.168.1.254) at (incomplete) on en0 ifscope [ethernet]
? (192.168.1.255) at ff:ff:ff:ff:ff:ff on en0 ifscope [ethernet]
";
        let table = parse_arp_a(content);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.mac_for(Ipv4Addr::new(192, 168, 1, 1)),
            Some("00:1A:2B:3C:4D:5E")
        );
    }

    #[test]
    fn test_parse_arp_a_windows() {
        let content = "\
Interface: 192.168.1.10 --- 0x4
  Internet Address      Physical Address      Type
  192.168.1.1           a4-91-b1-00-11-22     dynamic
  192.168.1.255         ff-ff-ff-ff-ff-ff     static
  224.0.0.22            01-00-5e-00-00-16     static
";
        let table = parse_arp_a(content);
        assert_eq!(
            table.mac_for(Ipv4Addr::new(192, 168, 1, 1)),
            Some("A4:91:B1:00:11:22")
        );
        assert!(!table.contains(Ipv4Addr::new(192, 168, 1, 255)));
        assert!(!table.contains(Ipv4Addr::new(192, 168, 1, 10)));
        assert!(!table.contains(Ipv4Addr::new(224, 0, 0, 22)));
    }
}
