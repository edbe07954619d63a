//! Network scanning primitives.
//!
//! Provides cross-platform host discovery using:
//! - ARP/neighbor table reading
//! - ICMP ping with TCP connect fallback
//! - Reverse DNS hostname resolution
//! - Safe-port scanning and banner reads
//! - MAC OUI vendor lookup and OS / device-type heuristics

pub mod arp;
pub mod cidr;
pub mod fingerprint;
pub mod hostname;
pub mod oui;
pub mod ping;
pub mod ports;
pub mod privileges;
pub mod probe;

pub use privileges::ScanCapabilities;
pub use probe::{HostProber, ProbeOutcome, ProbePipeline, ProbeSettings, SystemProber};

use if_addrs::IfAddr;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::process::Stdio;
use tokio::process::Command;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows and is killed
/// when its future is dropped (e.g. by a probe timeout).
pub(crate) fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Interface name prefixes that never carry the LAN we want to scan.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "docker", "veth", "br-", "virbr", "vmnet", "vboxnet", "utun", "tun", "tap", "wg", "zt",
];

/// The local network the scanner defaults to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub interface: String,
    pub subnet: String,
    pub local_ip: String,
}

/// Find the first physical-looking IPv4 interface and its subnet.
///
/// Returns `None` when no usable interface is up, which the coordinator
/// treats as a link-down precondition.
pub fn detect_local_network() -> Option<NetworkInfo> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    let mut candidates: Vec<NetworkInfo> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback() && !is_virtual_interface(&iface.name))
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => network_for(&iface.name, v4.ip, v4.netmask),
            IfAddr::V6(_) => None,
        })
        .collect();

    // Prefer private ranges, then stable order by interface name
    candidates.sort_by_key(|info| {
        let private = info
            .local_ip
            .parse::<Ipv4Addr>()
            .map(|ip| ip.is_private())
            .unwrap_or(false);
        (!private, info.interface.clone())
    });
    candidates.into_iter().next()
}

fn network_for(name: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<NetworkInfo> {
    if ip.is_link_local() || ip.is_unspecified() {
        return None;
    }
    let prefix = ipnetwork::ipv4_mask_to_prefix(netmask).ok()?;
    let network = Ipv4Network::new(ip, prefix).ok()?;
    Some(NetworkInfo {
        interface: name.to_string(),
        subnet: format!("{}/{}", network.network(), network.prefix()),
        local_ip: ip.to_string(),
    })
}

fn is_virtual_interface(name: &str) -> bool {
    let lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_for_computes_subnet() {
        let info = network_for(
            "eth0",
            Ipv4Addr::new(192, 168, 1, 42),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();
        assert_eq!(info.subnet, "192.168.1.0/24");
        assert_eq!(info.local_ip, "192.168.1.42");
        assert_eq!(info.interface, "eth0");
    }

    #[test]
    fn test_network_for_skips_link_local() {
        let info = network_for(
            "eth0",
            Ipv4Addr::new(169, 254, 10, 1),
            Ipv4Addr::new(255, 255, 0, 0),
        );
        assert!(info.is_none());
    }

    #[test]
    fn test_virtual_interfaces_filtered() {
        assert!(is_virtual_interface("docker0"));
        assert!(is_virtual_interface("br-1a2b3c"));
        assert!(is_virtual_interface("vethabc"));
        assert!(!is_virtual_interface("eth0"));
        assert!(!is_virtual_interface("wlan0"));
        assert!(!is_virtual_interface("en0"));
    }
}
