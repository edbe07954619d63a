//! Scan scheduling: preconditions, progress and the single-flight coordinator.

pub mod coordinator;
pub mod preconditions;
pub mod progress;

pub use coordinator::{ScanCoordinator, ScanDisposition, ScanOutcome, ScanRequest, ScanTrigger};
pub use preconditions::{PreconditionProbe, Preconditions, SystemPreconditions};
pub use progress::{ProgressTracker, ScanPhase, ScanProgress};
