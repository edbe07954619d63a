//! Scan progress state machine.
//!
//! Progress is published through a `watch` channel. Every write names the
//! generation it belongs to; writes from a superseded generation and
//! backwards phase transitions are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanPhase {
    Idle,
    Queued,
    PreconditionBlocked,
    PermissionBlocked,
    Scanning,
    Cancelled,
    Complete,
}

impl ScanPhase {
    fn rank(self) -> u8 {
        match self {
            ScanPhase::Idle => 0,
            ScanPhase::Queued => 1,
            ScanPhase::Scanning => 2,
            ScanPhase::PreconditionBlocked
            | ScanPhase::PermissionBlocked
            | ScanPhase::Cancelled
            | ScanPhase::Complete => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    pub fn is_active(self) -> bool {
        matches!(self, ScanPhase::Queued | ScanPhase::Scanning)
    }

    /// Forward-only; `Scanning -> Scanning` is allowed for percentage updates.
    pub fn can_advance_to(self, next: ScanPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank() || (self == ScanPhase::Scanning && next == ScanPhase::Scanning)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanPhase::Idle => "IDLE",
            ScanPhase::Queued => "QUEUED",
            ScanPhase::PreconditionBlocked => "PRECONDITION_BLOCKED",
            ScanPhase::PermissionBlocked => "PERMISSION_BLOCKED",
            ScanPhase::Scanning => "SCANNING",
            ScanPhase::Cancelled => "CANCELLED",
            ScanPhase::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub progress_pct: u8,
    pub devices_found: usize,
    pub subnet: Option<String>,
    pub message: Option<String>,
    pub fix_action: Option<String>,
    pub updated_at: i64,
    pub generation: u64,
    pub last_scan_error: Option<String>,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            phase: ScanPhase::Idle,
            progress_pct: 0,
            devices_found: 0,
            subnet: None,
            message: None,
            fix_action: None,
            updated_at: now_ms(),
            generation: 0,
            last_scan_error: None,
        }
    }
}

/// Percentage of `done` out of `total`, clamped to 0..=100.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<ScanProgress>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(ScanProgress::default()),
        }
    }

    pub fn current(&self) -> ScanProgress {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.tx.subscribe()
    }

    /// Start `generation` in `QUEUED` for `subnet`. Ignored if a newer
    /// generation already owns the progress.
    pub fn begin(&self, generation: u64, subnet: Option<&str>) -> bool {
        self.tx.send_if_modified(|p| {
            if generation <= p.generation {
                return false;
            }
            *p = ScanProgress {
                phase: ScanPhase::Queued,
                subnet: subnet.map(str::to_string),
                generation,
                last_scan_error: p.last_scan_error.take(),
                ..ScanProgress::default()
            };
            true
        })
    }

    /// Move `generation` to `phase` and apply `edit`. Returns false when the
    /// write was stale or the transition would go backwards.
    pub fn advance(&self, generation: u64, phase: ScanPhase, edit: impl FnOnce(&mut ScanProgress)) -> bool {
        self.tx.send_if_modified(|p| {
            if p.generation != generation || !p.phase.can_advance_to(phase) {
                return false;
            }
            p.phase = phase;
            edit(p);
            p.updated_at = now_ms();
            true
        })
    }

    /// Terminal blocked state for `generation`, recording the reason as the
    /// last scan error.
    pub fn block(&self, generation: u64, phase: ScanPhase, message: &str, fix_action: Option<&str>) -> bool {
        self.advance(generation, phase, |p| {
            p.message = Some(message.to_string());
            p.fix_action = fix_action.map(str::to_string);
            p.last_scan_error = Some(message.to_string());
        })
    }
}
