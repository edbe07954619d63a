//! Reverse DNS through the system resolver tools.

use super::hidden_command;
use std::net::Ipv4Addr;

/// Resolve `ip` to a hostname. A result equal to the IP itself is not a
/// hostname and is discarded.
pub async fn reverse_lookup(ip: Ipv4Addr) -> Option<String> {
    let ip_str = ip.to_string();
    let name = lookup_with_system_tools(&ip_str).await?;
    sanitize_hostname(&name, &ip_str)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
async fn lookup_with_system_tools(ip: &str) -> Option<String> {
    // Method 1: getent hosts (honours /etc/hosts and nsswitch)
    if let Ok(output) = hidden_command("getent").args(["hosts", ip]).output().await {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout);
            if let Some(name) = out.split_whitespace().nth(1) {
                return Some(name.to_string());
            }
        }
    }

    // Method 2: host command (PTR query)
    if let Ok(output) = hidden_command("host").arg(ip).output().await {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout);
            if let Some(name) = parse_host_pointer(&out) {
                return Some(name);
            }
        }
    }

    None
}

#[cfg(target_os = "windows")]
async fn lookup_with_system_tools(ip: &str) -> Option<String> {
    let script = format!(
        "try {{ (Resolve-DnsName -Name '{}' -Type PTR -ErrorAction Stop).NameHost }} catch {{ }}",
        ip
    );
    let output = hidden_command("powershell")
        .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", &script])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let out = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!out.is_empty()).then_some(out)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
async fn lookup_with_system_tools(_ip: &str) -> Option<String> {
    None
}

/// Extract the name from `host` output such as
/// `1.1.168.192.in-addr.arpa domain name pointer router.lan.`
pub fn parse_host_pointer(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.split("pointer").nth(1))
        .map(|name| name.trim().trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
}

pub fn sanitize_hostname(name: &str, ip: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name == ip {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_pointer() {
        let out = "1.1.168.192.in-addr.arpa domain name pointer router.lan.\n";
        assert_eq!(parse_host_pointer(out).as_deref(), Some("router.lan"));
        assert_eq!(parse_host_pointer("Host 1.1.168.192.in-addr.arpa not found"), None);
    }

    #[test]
    fn test_sanitize_discards_ip_echo() {
        assert_eq!(sanitize_hostname("192.168.1.5", "192.168.1.5"), None);
        assert_eq!(sanitize_hostname(" nas.local. ", "192.168.1.5").as_deref(), Some("nas.local"));
        assert_eq!(sanitize_hostname("", "192.168.1.5"), None);
    }
}
