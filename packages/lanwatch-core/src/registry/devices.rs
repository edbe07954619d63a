//! Merged device snapshots plus the per-device event log.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::change;
use crate::model::{Device, DeviceEvent, DeviceMeta, EventKind};
use crate::store::DeviceStore;
use crate::uptime;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of merging one probe result.
#[derive(Debug, Clone)]
pub struct Observation {
    pub device: Device,
    pub events: Vec<EventKind>,
}

/// Owns every known device and its event history.
///
/// Storage failures are logged and swallowed: the in-memory view stays
/// authoritative for the running process. Store updates made under the map
/// lock are in-memory only; file I/O happens in [`DeviceRegistry::flush`].
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
    events: RwLock<HashMap<String, Vec<DeviceEvent>>>,
    store: Arc<dyn DeviceStore>,
    max_events_per_device: usize,
    events_tx: broadcast::Sender<DeviceEvent>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn DeviceStore>, max_events_per_device: usize) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            store,
            max_events_per_device: max_events_per_device.max(1),
            events_tx,
        }
    }

    /// Populate from the store. Returns the number of devices loaded.
    pub fn load(&self) -> usize {
        let devices = match self.store.load_devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Failed to load devices from store: {}", e);
                Vec::new()
            }
        };
        let events = match self.store.load_events() {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Failed to load events from store: {}", e);
                Vec::new()
            }
        };

        let count = devices.len();
        {
            let mut map = self.devices.write();
            for device in devices {
                map.insert(device.id.clone(), device);
            }
        }
        {
            let mut log = self.events.write();
            for event in events {
                log.entry(event.device_id.clone()).or_default().push(event);
            }
            for history in log.values_mut() {
                history.sort_by_key(|e| e.ts);
                trim_front(history, self.max_events_per_device);
            }
        }

        tracing::info!("Device registry loaded {} devices", count);
        count
    }

    /// Merge a probe result, record the implied events and persist both.
    pub fn observe(&self, probed: Device, now_ms: i64) -> Observation {
        let mut devices = self.devices.write();
        let old = devices.get(&probed.id);
        let merged = merge(old, probed, now_ms);
        let kinds = change::diff(old, &merged);

        if old != Some(&merged) {
            devices.insert(merged.id.clone(), merged.clone());
            self.persist_device(&merged);
        }
        drop(devices);

        if !kinds.is_empty() {
            let mut log = self.events.write();
            let history = log.entry(merged.id.clone()).or_default();
            for kind in &kinds {
                let event = DeviceEvent::new(merged.id.clone(), now_ms, *kind);
                tracing::info!("event {} {}", merged.id, kind);
                history.push(event.clone());
                self.persist_event(&event);
                // No subscribers is not an error
                let _ = self.events_tx.send(event);
            }
            trim_front(history, self.max_events_per_device);
        }

        Observation {
            device: merged,
            events: kinds,
        }
    }

    /// Re-observe every online device currently at `ip` as offline.
    pub fn mark_offline_by_ip(&self, ip: &str, now_ms: i64) -> Vec<Observation> {
        let stale: Vec<Device> = self
            .devices
            .read()
            .values()
            .filter(|d| d.online && d.ip == ip)
            .cloned()
            .collect();

        stale
            .into_iter()
            .map(|mut device| {
                device.online = false;
                self.observe(device, now_ms)
            })
            .collect()
    }

    /// Look up by id. MAC ids match regardless of case and separator.
    pub fn get(&self, id: &str) -> Option<Device> {
        let devices = self.devices.read();
        let key = self.resolve_key(&devices, id)?;
        devices.get(&key).cloned()
    }

    /// All devices ordered by IP address.
    pub fn all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| ip_sort_key(&a.ip).cmp(&ip_sort_key(&b.ip)).then(a.id.cmp(&b.id)));
        devices
    }

    /// The devices with the given ids, skipping unknown ones, ordered by IP.
    pub fn select(&self, ids: &[String]) -> Vec<Device> {
        let map = self.devices.read();
        let mut devices: Vec<Device> = ids.iter().filter_map(|id| map.get(id).cloned()).collect();
        devices.sort_by(|a, b| ip_sort_key(&a.ip).cmp(&ip_sort_key(&b.ip)).then(a.id.cmp(&b.id)));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Event history of a known device, oldest first.
    pub fn history(&self, id: &str) -> Option<Vec<DeviceEvent>> {
        let key = {
            let devices = self.devices.read();
            self.resolve_key(&devices, id)?
        };
        Some(self.events.read().get(&key).cloned().unwrap_or_default())
    }

    /// Percentage of the trailing `window_ms` the device was online.
    pub fn uptime_pct(&self, id: &str, window_ms: i64, now_ms: i64) -> Option<f64> {
        let history = self.history(id)?;
        Some(uptime::pct(&history, window_ms, now_ms))
    }

    /// Overlay the non-null fields of `patch` onto the device's metadata.
    pub fn update_meta(&self, id: &str, patch: DeviceMeta) -> Option<Device> {
        let mut devices = self.devices.write();
        let key = self.resolve_key(&devices, id)?;
        let device = devices.get_mut(&key)?;
        let mut meta = device.meta();
        meta.merge(patch);
        device.set_meta(meta);
        let updated = device.clone();
        self.persist_device(&updated);
        Some(updated)
    }

    /// Write pending store changes. Blocking; async callers go through
    /// `spawn_blocking`.
    pub fn flush(&self) {
        if let Err(e) = self.store.flush() {
            tracing::warn!("Failed to flush device store: {}", e);
        }
    }

    /// Live feed of every recorded event.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events_tx.subscribe()
    }

    fn resolve_key(&self, devices: &HashMap<String, Device>, id: &str) -> Option<String> {
        let trimmed = id.trim();
        if devices.contains_key(trimmed) {
            return Some(trimmed.to_string());
        }
        let normalized = trimmed.to_uppercase().replace('-', ":");
        devices.contains_key(&normalized).then_some(normalized)
    }

    fn persist_device(&self, device: &Device) {
        if let Err(e) = self.store.save_device(device) {
            tracing::warn!("Failed to persist device {}: {}", device.id, e);
        }
    }

    fn persist_event(&self, event: &DeviceEvent) {
        if let Err(e) = self.store.record_event(event) {
            tracing::warn!("Failed to persist event {} {}: {}", event.device_id, event.kind, e);
        }
    }
}

/// Combine a fresh probe result with what was already known.
///
/// User metadata always survives. Identity fields the probe could not
/// determine keep their previous values, and an offline probe keeps the
/// last known services.
fn merge(old: Option<&Device>, mut probed: Device, now_ms: i64) -> Device {
    let Some(old) = old else {
        if probed.online {
            probed.last_seen = now_ms;
        }
        return probed;
    };

    let inferred_type = probed.device_type.take();
    probed.set_meta(old.meta());
    if probed.device_type.is_none() {
        probed.device_type = inferred_type;
    }

    probed.mac = probed.mac.or_else(|| old.mac.clone());
    probed.hostname = probed.hostname.or_else(|| old.hostname.clone());
    probed.vendor = probed.vendor.or_else(|| old.vendor.clone());
    probed.os = probed.os.or_else(|| old.os.clone());

    if probed.online {
        probed.last_seen = now_ms;
    } else {
        probed.last_seen = old.last_seen;
        if probed.open_ports.is_empty() {
            probed.open_ports = old.open_ports.clone();
            probed.banners = old.banners.clone();
        }
    }
    probed
}

fn trim_front(history: &mut Vec<DeviceEvent>, keep: usize) {
    if history.len() > keep {
        let excess = history.len() - keep;
        history.drain(..excess);
    }
}

fn ip_sort_key(ip: &str) -> (u8, u32) {
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) => (0, u32::from(addr)),
        Err(_) => (1, 0),
    }
}
