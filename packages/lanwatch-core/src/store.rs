//! Persistence contract for devices and events.
//!
//! The engine only ever talks to a [`DeviceStore`]. Two implementations ship:
//! an in-memory store and a JSON state file that survives restarts.
//!
//! Saves are cheap in-memory updates. Durable stores write on [`DeviceStore::flush`],
//! which callers run off the async workers at scan end, on a timer and at shutdown.

use crate::error::StoreError;
use crate::model::{Device, DeviceEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Load/save contract consumed by the device registry.
pub trait DeviceStore: Send + Sync {
    fn load_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// All recorded events, ordered by `ts` per device.
    fn load_events(&self) -> Result<Vec<DeviceEvent>, StoreError>;

    /// Insert or replace the device with the same `id`.
    fn save_device(&self, device: &Device) -> Result<(), StoreError>;

    fn record_event(&self, event: &DeviceEvent) -> Result<(), StoreError>;

    /// Make pending changes durable. Blocking.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Everything a store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    #[serde(default)]
    devices: BTreeMap<String, Device>,
    #[serde(default)]
    events: Vec<DeviceEvent>,
}

impl StoreState {
    fn upsert(&mut self, device: &Device) {
        self.devices.insert(device.id.clone(), device.clone());
    }

    /// Append and drop the oldest events of that device beyond `max_per_device`.
    fn append(&mut self, event: &DeviceEvent, max_per_device: usize) {
        self.events.push(event.clone());
        let count = self
            .events
            .iter()
            .filter(|e| e.device_id == event.device_id)
            .count();
        if count > max_per_device {
            let mut excess = count - max_per_device;
            self.events.retain(|e| {
                if excess > 0 && e.device_id == event.device_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// Volatile store, used for tests and `storage.persist = false`.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    max_events_per_device: usize,
}

impl MemoryStore {
    pub fn new(max_events_per_device: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            max_events_per_device,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::StorageConfig::default().max_events_per_device)
    }
}

impl DeviceStore for MemoryStore {
    fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.state.lock().devices.values().cloned().collect())
    }

    fn load_events(&self) -> Result<Vec<DeviceEvent>, StoreError> {
        Ok(self.state.lock().events.clone())
    }

    fn save_device(&self, device: &Device) -> Result<(), StoreError> {
        self.state.lock().upsert(device);
        Ok(())
    }

    fn record_event(&self, event: &DeviceEvent) -> Result<(), StoreError> {
        self.state.lock().append(event, self.max_events_per_device);
        Ok(())
    }
}

/// Single JSON state file, rewritten whole on flush when anything changed.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    dirty: AtomicBool,
    /// Serializes flushes so two writers never share the temp file
    writer: Mutex<()>,
    max_events_per_device: usize,
}

impl JsonFileStore {
    /// Open the store at `path`, reading existing state if the file exists.
    pub fn open(path: impl Into<PathBuf>, max_events_per_device: usize) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let state: StoreState = serde_json::from_str(&content)?;
            tracing::info!(
                "Loaded state from {:?}: {} devices, {} events",
                path,
                state.devices.len(),
                state.events.len()
            );
            state
        } else {
            tracing::debug!("No state file at {:?}, starting empty", path);
            StoreState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
            dirty: AtomicBool::new(false),
            writer: Mutex::new(()),
            max_events_per_device,
        })
    }

    /// Open at the platform data directory (`…/lanwatch/state.json`).
    pub fn open_default(max_events_per_device: usize) -> Result<Self, StoreError> {
        let path = crate::config::default_state_path().ok_or(StoreError::NoLocation)?;
        Self::open(path, max_events_per_device)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether changes are waiting for the next flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn write(&self, content: &str) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DeviceStore for JsonFileStore {
    fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.state.lock().devices.values().cloned().collect())
    }

    fn load_events(&self) -> Result<Vec<DeviceEvent>, StoreError> {
        Ok(self.state.lock().events.clone())
    }

    fn save_device(&self, device: &Device) -> Result<(), StoreError> {
        self.state.lock().upsert(device);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn record_event(&self, event: &DeviceEvent) -> Result<(), StoreError> {
        self.state.lock().append(event, self.max_events_per_device);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        // Serialize under the state lock, write without it
        let content = match serde_json::to_string_pretty(&*self.state.lock()) {
            Ok(content) => content,
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
        };
        if let Err(e) = self.write(&content) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        tracing::debug!("Flushed state to {:?}", self.path);
        Ok(())
    }
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush state to {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;

    #[test]
    fn test_memory_store_upserts_by_id() {
        let store = MemoryStore::default();
        let mut device = Device::observed("10.0.0.2", Some("AA:BB:CC:DD:EE:01".to_string()));
        store.save_device(&device).unwrap();
        device.ip = "10.0.0.3".to_string();
        store.save_device(&device).unwrap();

        let devices = store.load_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip, "10.0.0.3");
    }

    #[test]
    fn test_retention_trims_oldest_per_device() {
        let store = MemoryStore::new(2);
        for ts in 1..=3 {
            store
                .record_event(&DeviceEvent::new("a", ts, EventKind::DeviceOnline))
                .unwrap();
        }
        store
            .record_event(&DeviceEvent::new("b", 10, EventKind::NewDevice))
            .unwrap();

        let events = store.load_events().unwrap();
        let a: Vec<i64> = events.iter().filter(|e| e.device_id == "a").map(|e| e.ts).collect();
        assert_eq!(a, vec![2, 3]);
        assert_eq!(events.iter().filter(|e| e.device_id == "b").count(), 1);
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let store = JsonFileStore::open(&path, 100).unwrap();
            store.save_device(&Device::observed("10.0.0.9", None)).unwrap();
            store
                .record_event(&DeviceEvent::new("10.0.0.9", 42, EventKind::NewDevice))
                .unwrap();
            store.flush().unwrap();
        }

        let store = JsonFileStore::open(&path, 100).unwrap();
        assert_eq!(store.load_devices().unwrap()[0].id, "10.0.0.9");
        assert_eq!(store.load_events().unwrap()[0].ts, 42);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_writes_only_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::open(&path, 100).unwrap();

        for i in 0..50 {
            store
                .save_device(&Device::observed(&format!("10.0.0.{}", i), None))
                .unwrap();
        }
        assert!(!path.exists());
        assert!(store.is_dirty());

        store.flush().unwrap();
        assert!(!store.is_dirty());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("10.0.0.49"));

        // Nothing pending: no rewrite
        std::fs::remove_file(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_json_store_flushes_pending_changes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = JsonFileStore::open(&path, 100).unwrap();
            store.save_device(&Device::observed("10.0.0.7", None)).unwrap();
        }
        let store = JsonFileStore::open(&path, 100).unwrap();
        assert_eq!(store.load_devices().unwrap()[0].id, "10.0.0.7");
    }

    #[test]
    fn test_failed_flush_stays_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone").join("state.json");
        let store = JsonFileStore::open(&path, 100).unwrap();
        store.save_device(&Device::observed("10.0.0.8", None)).unwrap();

        std::fs::remove_dir_all(dir.path().join("gone")).unwrap();
        assert!(matches!(store.flush(), Err(StoreError::Io(_))));
        assert!(store.is_dirty());

        std::fs::create_dir_all(dir.path().join("gone")).unwrap();
        store.flush().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path, 100),
            Err(StoreError::Serialization(_))
        ));
    }
}
