//! Device and event model shared by the scanner, registry and API.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A host observed on the local network.
///
/// `id` is the MAC address when one is known and the IP otherwise. Once a
/// device has been stored under an id, that id never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub open_ports: BTreeSet<u16>,
    #[serde(default)]
    pub banners: BTreeMap<u16, String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub trust: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Device {
    /// Build a bare device for `ip`, keyed by `mac` when present.
    pub fn observed(ip: impl Into<String>, mac: Option<String>) -> Self {
        let ip = ip.into();
        let id = device_id(&ip, mac.as_deref());
        Self {
            id,
            ip,
            mac,
            hostname: None,
            vendor: None,
            os: None,
            online: false,
            last_seen: 0,
            open_ports: BTreeSet::new(),
            banners: BTreeMap::new(),
            name: None,
            owner: None,
            room: None,
            note: None,
            trust: None,
            device_type: None,
            status: None,
        }
    }

    /// Display name: user-set name, then hostname, then IP.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.hostname.as_deref())
            .unwrap_or(&self.ip)
    }

    /// The user-editable part of the device.
    pub fn meta(&self) -> DeviceMeta {
        DeviceMeta {
            name: self.name.clone(),
            owner: self.owner.clone(),
            room: self.room.clone(),
            note: self.note.clone(),
            trust: self.trust.clone(),
            device_type: self.device_type.clone(),
            status: self.status.clone(),
        }
    }

    /// Replace the user-editable fields wholesale.
    pub fn set_meta(&mut self, meta: DeviceMeta) {
        self.name = meta.name;
        self.owner = meta.owner;
        self.room = meta.room;
        self.note = meta.note;
        self.trust = meta.trust;
        self.device_type = meta.device_type;
        self.status = meta.status;
    }
}

/// Stable identity key for a host.
pub fn device_id(ip: &str, mac: Option<&str>) -> String {
    match mac {
        Some(mac) if !mac.trim().is_empty() => mac.trim().to_uppercase().replace('-', ":"),
        _ => ip.to_string(),
    }
}

/// User-editable metadata attached to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub trust: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl DeviceMeta {
    /// Overlay every non-null field of `patch` onto `self`.
    pub fn merge(&mut self, patch: DeviceMeta) {
        fn take(slot: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.name, patch.name);
        take(&mut self.owner, patch.owner);
        take(&mut self.room, patch.room);
        take(&mut self.note, patch.note);
        take(&mut self.trust, patch.trust);
        take(&mut self.device_type, patch.device_type);
        take(&mut self.status, patch.status);
    }
}

/// Lifecycle transitions emitted by change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    NewDevice,
    DeviceOnline,
    DeviceOffline,
    IpChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewDevice => "NEW_DEVICE",
            EventKind::DeviceOnline => "DEVICE_ONLINE",
            EventKind::DeviceOffline => "DEVICE_OFFLINE",
            EventKind::IpChanged => "IP_CHANGED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition for a device. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_id: String,
    pub ts: i64,
    #[serde(rename = "event")]
    pub kind: EventKind,
}

impl DeviceEvent {
    pub fn new(device_id: impl Into<String>, ts: i64, kind: EventKind) -> Self {
        Self {
            device_id: device_id.into(),
            ts,
            kind,
        }
    }
}
