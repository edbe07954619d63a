//! Best-effort OS and device-type guesses from probe signals.
//!
//! Both are ordered rule lists where the first match wins, so results are
//! deterministic for a given set of inputs.

use std::collections::{BTreeMap, BTreeSet};

use super::oui;

/// Everything the heuristics look at.
#[derive(Debug, Clone, Copy)]
pub struct Signals<'a> {
    pub open_ports: &'a BTreeSet<u16>,
    pub banners: &'a BTreeMap<u16, String>,
    pub hostname: Option<&'a str>,
    pub vendor: Option<&'a str>,
    pub mac: Option<&'a str>,
}

struct Lowered {
    banners: String,
    hostname: String,
    vendor: String,
}

impl Signals<'_> {
    fn has(&self, port: u16) -> bool {
        self.open_ports.contains(&port)
    }

    fn lowered(&self) -> Lowered {
        Lowered {
            banners: self
                .banners
                .values()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
            hostname: self.hostname.unwrap_or_default().to_lowercase(),
            vendor: self.vendor.unwrap_or_default().to_lowercase(),
        }
    }
}

pub fn infer_os(signals: &Signals<'_>) -> Option<&'static str> {
    let text = signals.lowered();

    if signals.has(445) || signals.has(3389) || text.banners.contains("microsoft") {
        return Some("Windows");
    }
    if signals.has(5555) || text.hostname.contains("android") {
        return Some("Android");
    }
    if signals.has(22)
        && ["ubuntu", "debian", "openssh"]
            .iter()
            .any(|k| text.banners.contains(k))
    {
        return Some("Linux");
    }
    if text.vendor.contains("apple") || text.hostname.contains("mac") {
        return Some("macOS");
    }
    None
}

/// Device category, falling back to the OS name when nothing more specific
/// applies.
pub fn infer_device_type(signals: &Signals<'_>, os: Option<&str>) -> Option<String> {
    let text = signals.lowered();

    let guess = if signals.has(554) || text.banners.contains("rtsp") {
        Some("Camera")
    } else if signals.has(9100) || text.vendor.contains("brother") || text.vendor.contains("hp inc") {
        Some("Printer")
    } else if signals.has(53) || signals.has(67) {
        Some("Router")
    } else if (signals.has(80) || signals.has(443))
        && ["ubiquiti", "netgear", "linksys"]
            .iter()
            .any(|k| text.vendor.contains(k))
    {
        Some("Gateway")
    } else if text.vendor.contains("apple")
        || text.hostname.contains("iphone")
        || text.hostname.contains("ipad")
    {
        Some("Mobile")
    } else if text.vendor.contains("samsung") || text.hostname.contains("android") {
        Some("Mobile")
    } else if text.vendor.contains("microsoft") || os == Some("Windows") {
        Some("PC")
    } else if signals.mac.is_some_and(oui::is_virtual_mac) {
        Some("VM")
    } else if text.hostname.contains("raspberrypi") {
        Some("IoT")
    } else {
        signals.vendor.and_then(oui::vendor_category)
    };

    guess.map(str::to_string).or_else(|| os.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        ports: BTreeSet<u16>,
        banners: BTreeMap<u16, String>,
        hostname: Option<&'static str>,
        vendor: Option<&'static str>,
        mac: Option<&'static str>,
    }

    impl Probe {
        fn new(ports: &[u16]) -> Self {
            Self {
                ports: ports.iter().copied().collect(),
                banners: BTreeMap::new(),
                hostname: None,
                vendor: None,
                mac: None,
            }
        }

        fn banner(mut self, port: u16, text: &str) -> Self {
            self.banners.insert(port, text.to_string());
            self
        }

        fn signals(&self) -> Signals<'_> {
            Signals {
                open_ports: &self.ports,
                banners: &self.banners,
                hostname: self.hostname,
                vendor: self.vendor,
                mac: self.mac,
            }
        }
    }

    #[test]
    fn test_os_rules_in_order() {
        assert_eq!(infer_os(&Probe::new(&[445]).signals()), Some("Windows"));
        assert_eq!(infer_os(&Probe::new(&[3389, 22]).signals()), Some("Windows"));
        assert_eq!(infer_os(&Probe::new(&[5555]).signals()), Some("Android"));

        let ssh = Probe::new(&[22]).banner(22, "SSH-2.0-OpenSSH_9.6p1 Ubuntu-3");
        assert_eq!(infer_os(&ssh.signals()), Some("Linux"));

        let mut apple = Probe::new(&[]);
        apple.vendor = Some("Apple, Inc.");
        assert_eq!(infer_os(&apple.signals()), Some("macOS"));

        assert_eq!(infer_os(&Probe::new(&[22]).signals()), None);
        assert_eq!(infer_os(&Probe::new(&[]).signals()), None);
    }

    #[test]
    fn test_windows_wins_over_android() {
        let mut both = Probe::new(&[445, 5555]);
        both.hostname = Some("android-tv");
        assert_eq!(infer_os(&both.signals()), Some("Windows"));
    }

    #[test]
    fn test_device_types() {
        assert_eq!(infer_device_type(&Probe::new(&[554, 80]).signals(), None).as_deref(), Some("Camera"));
        assert_eq!(infer_device_type(&Probe::new(&[9100]).signals(), None).as_deref(), Some("Printer"));
        assert_eq!(infer_device_type(&Probe::new(&[53, 80]).signals(), None).as_deref(), Some("Router"));

        let mut gateway = Probe::new(&[443]);
        gateway.vendor = Some("Ubiquiti Inc");
        assert_eq!(infer_device_type(&gateway.signals(), None).as_deref(), Some("Gateway"));

        let mut phone = Probe::new(&[]);
        phone.hostname = Some("Johns-iPhone");
        assert_eq!(infer_device_type(&phone.signals(), None).as_deref(), Some("Mobile"));

        assert_eq!(
            infer_device_type(&Probe::new(&[445]).signals(), Some("Windows")).as_deref(),
            Some("PC")
        );
    }

    #[test]
    fn test_device_type_falls_back_to_vendor_then_os() {
        let mut vm = Probe::new(&[22]);
        vm.mac = Some("52:54:00:12:34:56");
        assert_eq!(infer_device_type(&vm.signals(), Some("Linux")).as_deref(), Some("VM"));

        let mut nas = Probe::new(&[5000]);
        nas.vendor = Some("Synology Incorporated");
        assert_eq!(infer_device_type(&nas.signals(), None).as_deref(), Some("NAS"));

        assert_eq!(
            infer_device_type(&Probe::new(&[22]).signals(), Some("Linux")).as_deref(),
            Some("Linux")
        );
        assert_eq!(infer_device_type(&Probe::new(&[]).signals(), None), None);
    }
}
