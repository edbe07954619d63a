//! Privilege detection for network scanning
//!
//! Different platforms have different requirements for network scanning:
//! - Windows: ICMP ping works without admin, ARP reads via `arp -a`
//! - Linux: system ping is usually setuid or has CAP_NET_RAW; /proc/net/arp is world-readable
//! - macOS: ICMP ping works without root for most operations

use serde::{Deserialize, Serialize};

use super::hidden_command;

/// Scan mode indicating the level of access available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// ICMP and ARP both usable
    Full,
    /// Reachability falls back to TCP connects only
    Limited,
    /// Neither ICMP nor the neighbor table is usable
    Blocked,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Full => write!(f, "full"),
            ScanMode::Limited => write!(f, "limited"),
            ScanMode::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCapabilities {
    pub mode: ScanMode,
    pub can_ping: bool,
    pub can_read_arp: bool,
    pub is_elevated: bool,
    pub warning: Option<String>,
}

impl ScanCapabilities {
    pub fn from_checks(can_ping: bool, can_read_arp: bool, is_elevated: bool) -> Self {
        let mode = match (can_ping, can_read_arp) {
            (true, true) => ScanMode::Full,
            (false, false) => ScanMode::Blocked,
            _ => ScanMode::Limited,
        };
        let warning = match mode {
            ScanMode::Full => None,
            ScanMode::Limited => Some(
                "Running with limited scan capabilities. Some devices may not be discovered."
                    .to_string(),
            ),
            ScanMode::Blocked => Some(
                "Neither ping nor the ARP table is available to this process.".to_string(),
            ),
        };
        Self {
            mode,
            can_ping,
            can_read_arp,
            is_elevated,
            warning,
        }
    }
}

impl Default for ScanCapabilities {
    fn default() -> Self {
        Self::from_checks(true, true, false)
    }
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Test if the system ping can reach loopback
pub async fn test_ping_capability() -> bool {
    let mut cmd = hidden_command("ping");

    #[cfg(target_os = "windows")]
    cmd.args(["-n", "1", "-w", "500", "127.0.0.1"]);

    #[cfg(not(target_os = "windows"))]
    cmd.args(["-c", "1", "-W", "1", "127.0.0.1"]);

    let output = tokio::time::timeout(std::time::Duration::from_secs(2), cmd.output()).await;
    matches!(output, Ok(Ok(o)) if o.status.success())
}

/// Test if the neighbor table can be read at all. An empty table still counts.
pub async fn test_arp_capability() -> bool {
    #[cfg(target_os = "linux")]
    {
        if tokio::fs::metadata("/proc/net/arp").await.is_ok() {
            return true;
        }
    }

    matches!(
        hidden_command("arp").arg("-a").output().await,
        Ok(output) if output.status.success()
    )
}

/// Detect scan capabilities based on current privileges
pub async fn detect_capabilities() -> ScanCapabilities {
    let (can_ping, can_read_arp) = tokio::join!(test_ping_capability(), test_arp_capability());
    let caps = ScanCapabilities::from_checks(can_ping, can_read_arp, is_elevated());
    if let Some(warning) = &caps.warning {
        tracing::warn!("{} (mode: {})", warning, caps.mode);
    }
    caps
}

/// Platform-specific hint shown alongside a permission block
pub fn get_elevation_instructions() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "Run lanwatch from an elevated prompt, or allow ICMP echo in Windows Firewall."
    }

    #[cfg(target_os = "linux")]
    {
        "Grant the ping binary CAP_NET_RAW (sudo setcap cap_net_raw+ep $(which ping)) \
         or run lanwatch as a user allowed to read /proc/net/arp."
    }

    #[cfg(target_os = "macos")]
    {
        "Allow lanwatch under System Settings > Privacy & Security > Local Network."
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "Elevated privileges may be required for network scanning."
    }
}
