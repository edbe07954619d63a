//! Lanwatch Core Library
//!
//! This crate provides the engine behind the `lanwatch` service:
//! - LAN discovery (CIDR expansion, reachability, ports, banners, ARP, OUI)
//! - A single-flight scan coordinator with progress reporting
//! - A device registry with change detection, history and uptime
//! - A node gateway for remote agents speaking a small JSON protocol
//! - The HTTP/WebSocket API exposing all of the above
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lanwatch_core::{DeviceRegistry, MemoryStore, ScanCoordinator, ScanRequest, config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let loaded = config::load_config();
//!     let store = Arc::new(MemoryStore::default());
//!     let registry = Arc::new(DeviceRegistry::new(store, loaded.config.storage.max_events_per_device));
//!     let coordinator = Arc::new(ScanCoordinator::from_config(&loaded.config, registry));
//!
//!     coordinator.request_scan(ScanRequest::manual(Some("192.168.1.0/24"))).await;
//!     coordinator.wait_until_settled().await;
//!     println!("Found {} devices", coordinator.results().len());
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod registry;
pub mod resilience;
pub mod scan;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod uptime;
pub mod validation;

// Re-export commonly used types
pub use api::{AppState, router};
pub use config::{Config, ConfigSource, LoadedConfig};
pub use error::{ApiError, GatewayErrorCode, StoreError, ValidationError};
pub use gateway::{GatewaySession, NodeRegistry, NodeSession};
pub use model::{Device, DeviceEvent, DeviceMeta, EventKind};
pub use registry::DeviceRegistry;
pub use scan::{ScanCoordinator, ScanPhase, ScanProgress, ScanRequest};
pub use scanner::{NetworkInfo, ScanCapabilities};
pub use store::{DeviceStore, JsonFileStore, MemoryStore};
