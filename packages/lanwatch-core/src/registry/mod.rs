//! Device state: change detection and the merged device registry.

pub mod change;
pub mod devices;

pub use change::diff;
pub use devices::DeviceRegistry;
