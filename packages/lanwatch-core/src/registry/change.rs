//! Lifecycle event detection between two snapshots of the same device.

use crate::model::{Device, EventKind};

/// Events implied by moving from `old` to `new`.
///
/// A first sighting yields only `NEW_DEVICE`; its online state is not
/// reported until it next changes. Otherwise an online flip and an IP change
/// are reported independently, online first.
pub fn diff(old: Option<&Device>, new: &Device) -> Vec<EventKind> {
    let Some(old) = old else {
        return vec![EventKind::NewDevice];
    };

    let mut events = Vec::new();
    if old.online != new.online {
        events.push(if new.online {
            EventKind::DeviceOnline
        } else {
            EventKind::DeviceOffline
        });
    }
    if old.ip != new.ip {
        events.push(EventKind::IpChanged);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ip: &str, online: bool) -> Device {
        let mut d = Device::observed(ip, Some("AA:BB:CC:00:00:01".to_string()));
        d.online = online;
        d
    }

    #[test]
    fn test_first_sighting() {
        assert_eq!(diff(None, &device("10.0.0.2", true)), vec![EventKind::NewDevice]);
    }

    #[test]
    fn test_online_transitions() {
        assert_eq!(
            diff(Some(&device("10.0.0.2", false)), &device("10.0.0.2", true)),
            vec![EventKind::DeviceOnline]
        );
        assert_eq!(
            diff(Some(&device("10.0.0.2", true)), &device("10.0.0.2", false)),
            vec![EventKind::DeviceOffline]
        );
    }

    #[test]
    fn test_ip_change() {
        assert_eq!(
            diff(Some(&device("10.0.0.2", true)), &device("10.0.0.3", true)),
            vec![EventKind::IpChanged]
        );
    }

    #[test]
    fn test_combined_and_unchanged() {
        assert_eq!(
            diff(Some(&device("10.0.0.2", false)), &device("10.0.0.3", true)),
            vec![EventKind::DeviceOnline, EventKind::IpChanged]
        );
        assert!(diff(Some(&device("10.0.0.2", true)), &device("10.0.0.2", true)).is_empty());
    }
}
