//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! Vendors resolve from, in order: a prefix file installed on the host
//! (nmap, IEEE or Wireshark format), the bundled IEEE registry from
//! `oui-data`, and a small built-in table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix files probed at load time; the first that exists wins.
pub const OUI_FILE_CANDIDATES: [&str; 3] = [
    "/usr/share/nmap/nmap-mac-prefixes",
    "/usr/share/ieee-data/oui.txt",
    "/usr/share/wireshark/manuf",
];

const FALLBACK: [(&str, &str); 3] = [
    ("B8:27:EB", "Raspberry Pi"),
    ("00:1A:2B", "Cisco"),
    ("FC:FB:FB", "Google"),
];

/// Vendor database keyed by `AA:BB:CC` prefix.
#[derive(Debug, Clone, Default)]
pub struct OuiDb {
    prefixes: HashMap<String, String>,
    source: Option<PathBuf>,
}

impl OuiDb {
    /// Load from the first existing candidate file, or start empty.
    pub fn load() -> Self {
        let Some(path) = OUI_FILE_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        else {
            tracing::debug!("No OUI prefix file found, using bundled registry");
            return Self::default();
        };
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let prefixes = parse_prefix_file(&content);
                tracing::info!("Loaded {} OUI prefixes from {:?}", prefixes.len(), path);
                Self {
                    prefixes,
                    source: Some(path.to_path_buf()),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read OUI file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn from_content(content: &str) -> Self {
        Self {
            prefixes: parse_prefix_file(content),
            source: None,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Vendor for `mac`, in any common notation.
    pub fn lookup(&self, mac: &str) -> Option<String> {
        let normalized = normalize_mac(mac)?;
        let prefix = &normalized[..8];

        if let Some(vendor) = self.prefixes.get(prefix) {
            return Some(vendor.clone());
        }

        if let Some(record) = oui_data::lookup(&normalized) {
            tracing::debug!(
                "OUI lookup for {}: {} (registry: {:?})",
                mac,
                record.organization(),
                record.registry()
            );
            return Some(record.organization().to_string());
        }

        FALLBACK
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, vendor)| vendor.to_string())
    }
}

/// Parse nmap (`001A2B Vendor`), IEEE (`00-1A-2B (base 16) Vendor`) and
/// Wireshark (`00:1A:2B<TAB>Short<TAB>Long`) prefix lines.
fn parse_prefix_file(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (prefix, vendor) = if let Some((prefix, vendor)) = trimmed.split_once("(base 16)") {
            (prefix.trim(), vendor.trim())
        } else if trimmed.contains('\t') {
            let mut parts = trimmed.split('\t').map(str::trim).filter(|p| !p.is_empty());
            let Some(prefix) = parts.next() else { continue };
            let short = parts.next().unwrap_or_default();
            (prefix, parts.next().unwrap_or(short))
        } else {
            match trimmed.split_once(char::is_whitespace) {
                Some((prefix, vendor)) => (prefix, vendor.trim()),
                None => continue,
            }
        };

        if vendor.is_empty() || prefix.contains('/') {
            continue;
        }
        let hex: String = prefix.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if hex.len() != 6 || prefix.chars().any(|c| !c.is_ascii_hexdigit() && c != ':' && c != '-') {
            continue;
        }
        let key = format!("{}:{}:{}", &hex[0..2], &hex[2..4], &hex[4..6]).to_uppercase();
        out.insert(key, vendor.to_string());
    }
    out
}

/// Normalize a MAC address to the format XX:XX:XX:XX:XX:XX
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac.trim().replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() < 6 {
        return None;
    }

    if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let padded = if cleaned.len() < 12 {
        format!("{:0<12}", cleaned)
    } else {
        cleaned[..12].to_string()
    };

    Some(format!(
        "{}:{}:{}:{}:{}:{}",
        &padded[0..2],
        &padded[2..4],
        &padded[4..6],
        &padded[6..8],
        &padded[8..10],
        &padded[10..12]
    ))
}

/// Vendor keyword table, checked top to bottom.
const VENDOR_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Firewall",
        &["firewalla", "pfsense", "opnsense", "sophos", "watchguard", "sonicwall", "fortinet"],
    ),
    (
        "VM",
        &["vmware", "xensource", "parallels", "virtualbox", "qemu", "proxmox"],
    ),
    (
        "Network",
        &[
            "cisco", "juniper", "arista", "tp-link", "d-link", "mikrotik", "aruba", "ruckus",
            "zyxel", "draytek", "meraki", "routerboard",
        ],
    ),
    ("NAS", &["synology", "qnap", "western digital", "asustor", "terramaster"]),
    (
        "Printer",
        &["hewlett packard", "hp inc", "canon", "epson", "brother", "xerox", "lexmark", "ricoh", "kyocera"],
    ),
    (
        "IoT",
        &[
            "raspberry", "espressif", "sonos", "philips", "signify", "ecobee", "wyze", "tuya",
            "shelly", "roku", "nanoleaf", "lifx", "amazon", "google",
        ],
    ),
    ("Console", &["nintendo", "sony interactive", "valve"]),
    ("Mobile", &["huawei", "xiaomi", "oneplus", "oppo", "vivo", "motorola", "realme"]),
    ("PC", &["dell", "lenovo", "acer", "asustek", "gigabyte", "micro-star", "intel"]),
];

/// Category implied by a vendor name alone.
pub fn vendor_category(vendor: &str) -> Option<&'static str> {
    let vendor = vendor.to_lowercase();
    VENDOR_CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| vendor.contains(k)))
        .map(|(category, _)| *category)
}

/// Locally administered prefixes handed out by hypervisors and container
/// runtimes.
const VM_PREFIXES: [&str; 10] = [
    "02:42:AC", // Docker
    "00:50:56", // VMware
    "00:0C:29", // VMware
    "00:05:69", // VMware
    "00:16:3E", // Xen
    "00:15:5D", // Hyper-V
    "00:1C:42", // Parallels
    "52:54:00", // QEMU/KVM
    "08:00:27", // VirtualBox
    "BC:24:11", // Proxmox VE
];

pub fn is_virtual_mac(mac: &str) -> bool {
    normalize_mac(mac).is_some_and(|m| VM_PREFIXES.contains(&&m[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("00-1a-2b-3c-4d-5e").as_deref(), Some("00:1A:2B:3C:4D:5E"));
        assert_eq!(normalize_mac("001a.2b3c.4d5e").as_deref(), Some("00:1A:2B:3C:4D:5E"));
        assert_eq!(normalize_mac("00:1a"), None);
        assert_eq!(normalize_mac("zz:zz:zz:zz:zz:zz"), None);
    }

    #[test]
    fn test_parse_nmap_format() {
        let db = OuiDb::from_content("# comment\n001A2B Example Corp\nB827EB Raspberry Pi Foundation\n");
        assert_eq!(db.len(), 2);
        assert_eq!(db.lookup("00:1a:2b:00:00:01").as_deref(), Some("Example Corp"));
    }

    #[test]
    fn test_parse_ieee_format() {
        let db = OuiDb::from_content(
            "00-1A-2B   (hex)\t\tExample Corp\n001A2B     (base 16)\t\tExample Corp Ltd\n",
        );
        assert_eq!(db.len(), 1);
        assert_eq!(db.lookup("00-1A-2B-11-22-33").as_deref(), Some("Example Corp Ltd"));
    }

    #[test]
    fn test_parse_wireshark_format() {
        let db = OuiDb::from_content(
            "00:1A:2B\tExample\tExample Corporation\n00:1B:C5:00:00:00/36\tSub\tSub Vendor\nAA:BB:CC\tShort\n",
        );
        assert_eq!(db.len(), 2);
        assert_eq!(db.lookup("00:1A:2B:00:00:00").as_deref(), Some("Example Corporation"));
        assert_eq!(db.lookup("AA:BB:CC:00:00:00").as_deref(), Some("Short"));
    }

    #[test]
    fn test_file_entries_take_precedence() {
        let db = OuiDb::from_content("B827EB Custom Name\n");
        assert_eq!(db.lookup("B8:27:EB:00:00:01").as_deref(), Some("Custom Name"));
    }

    #[test]
    fn test_builtin_fallback_covers_known_prefixes() {
        let db = OuiDb::default();
        // Whatever the bundled registry says, these prefixes always resolve
        assert!(db.lookup("B8:27:EB:12:34:56").is_some());
        assert!(db.lookup("FC:FB:FB:12:34:56").is_some());
        assert_eq!(db.lookup("nonsense"), None);
    }

    #[test]
    fn test_vendor_category() {
        assert_eq!(vendor_category("Cisco Systems, Inc."), Some("Network"));
        assert_eq!(vendor_category("Synology Incorporated"), Some("NAS"));
        assert_eq!(vendor_category("VMware, Inc."), Some("VM"));
        assert_eq!(vendor_category("Raspberry Pi Trading Ltd"), Some("IoT"));
        assert_eq!(vendor_category("Unknown Vendor"), None);
    }

    #[test]
    fn test_virtual_mac() {
        assert!(is_virtual_mac("00:50:56:12:34:56"));
        assert!(is_virtual_mac("02:42:ac:12:34:56"));
        assert!(!is_virtual_mac("00:17:F2:12:34:56"));
    }
}
