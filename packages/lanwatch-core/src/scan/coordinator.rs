//! Single-flight scan lifecycle.
//!
//! Each accepted request gets a new generation and its own cancellation
//! token. Starting a generation cancels the previous one; the superseded
//! run stops at its next checkpoint and its progress writes are dropped by
//! the tracker. Probe concurrency is bounded by one semaphore shared across
//! generations.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::preconditions::{PreconditionProbe, Preconditions, SystemPreconditions};
use super::progress::{self, ProgressTracker, ScanPhase, ScanProgress};
use crate::config::{Config, ScanConfig};
use crate::model::{Device, now_ms};
use crate::registry::DeviceRegistry;
use crate::resilience::RetryPolicy;
use crate::scanner::arp::ArpTable;
use crate::scanner::oui::OuiDb;
use crate::scanner::{ProbeOutcome, ProbePipeline, ProbeSettings, SystemProber, cidr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    Manual,
    Scheduled,
}

impl std::fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanTrigger::Manual => write!(f, "manual"),
            ScanTrigger::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Defaults to the local interface's subnet
    pub subnet: Option<String>,
    /// Overrides the per-probe connect timeout
    pub timeout_ms: Option<u64>,
    /// Bypass the minimum inter-scan interval
    pub force: bool,
    pub trigger: ScanTrigger,
}

impl ScanRequest {
    pub fn manual(subnet: Option<&str>) -> Self {
        Self {
            subnet: subnet.map(str::to_string),
            timeout_ms: None,
            force: false,
            trigger: ScanTrigger::Manual,
        }
    }

    pub fn scheduled() -> Self {
        Self {
            subnet: None,
            timeout_ms: None,
            force: false,
            trigger: ScanTrigger::Scheduled,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDisposition {
    Started { generation: u64 },
    /// Inside the minimum interval for the same subnet
    Throttled,
    /// Preconditions failed; progress holds the reason
    Blocked(ScanPhase),
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub disposition: ScanDisposition,
    /// Cached results at the time of the request
    pub devices: Vec<Device>,
}

struct ActiveScan {
    generation: u64,
    cancel: CancellationToken,
}

struct AcceptedScan {
    at_ms: i64,
    subnet: String,
}

struct GenerationResults {
    generation: u64,
    ids: Vec<String>,
}

#[derive(Default)]
struct RunCounters {
    done: AtomicUsize,
    found: AtomicUsize,
}

pub struct ScanCoordinator {
    registry: Arc<DeviceRegistry>,
    pipeline: ProbePipeline,
    preconditions: Arc<dyn PreconditionProbe>,
    progress: ProgressTracker,
    permits: Arc<Semaphore>,
    max_targets: usize,
    min_interval_ms: i64,
    generation: AtomicU64,
    active: Mutex<Option<ActiveScan>>,
    last_accepted: Mutex<Option<AcceptedScan>>,
    results: RwLock<Option<GenerationResults>>,
    last_scan_at: AtomicI64,
}

impl ScanCoordinator {
    pub fn new(
        config: &ScanConfig,
        registry: Arc<DeviceRegistry>,
        pipeline: ProbePipeline,
        preconditions: Arc<dyn PreconditionProbe>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            preconditions,
            progress: ProgressTracker::new(),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            max_targets: config.max_scan_targets,
            min_interval_ms: config.min_scan_interval_ms as i64,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
            last_accepted: Mutex::new(None),
            results: RwLock::new(None),
            last_scan_at: AtomicI64::new(0),
        }
    }

    /// Coordinator wired to the real network, OUI database and privileges.
    pub fn from_config(config: &Config, registry: Arc<DeviceRegistry>) -> Self {
        let oui = OuiDb::load();
        let pipeline = ProbePipeline::new(
            Arc::new(SystemProber),
            Arc::new(oui),
            RetryPolicy::from_config(&config.retry),
            ProbeSettings::from_config(&config.scan),
        );
        Self::new(&config.scan, registry, pipeline, Arc::new(SystemPreconditions))
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    pub fn last_scan_at(&self) -> Option<i64> {
        match self.last_scan_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Devices found by the latest generation that found any, otherwise
    /// every known device.
    pub fn results(&self) -> Vec<Device> {
        match self.results.read().as_ref() {
            Some(found) => self.registry.select(&found.ids),
            None => self.registry.all(),
        }
    }

    /// Readiness for a scan of `subnet` (or the local subnet) without
    /// starting one.
    pub async fn check_preconditions(&self, subnet: Option<&str>) -> Preconditions {
        self.preconditions.check(subnet).await
    }

    /// Check preconditions and start a scan generation in the background.
    ///
    /// Never fails: blocked and throttled requests leave a reason in the
    /// progress state (blocked) or nothing at all (throttled), and every
    /// outcome carries the current cached results.
    pub async fn request_scan(self: &Arc<Self>, request: ScanRequest) -> ScanOutcome {
        let checked = self.preconditions.check(request.subnet.as_deref()).await;
        let subnet = checked
            .subnet
            .as_deref()
            .map(|s| cidr::canonical(s).unwrap_or_else(|| s.to_string()));

        if checked.ready {
            if let Some(subnet) = &subnet {
                if !request.force && self.is_throttled(subnet, now_ms()) {
                    tracing::debug!(subnet = %subnet, trigger = %request.trigger, "Scan request throttled");
                    return self.outcome(ScanDisposition::Throttled);
                }
            }
        }

        let (subnet, phase) = match (checked.ready, subnet, checked.blocker) {
            (true, Some(subnet), _) => (subnet, None),
            (true, None, _) => (String::new(), Some(ScanPhase::PermissionBlocked)),
            (false, subnet, blocker) => (
                subnet.unwrap_or_default(),
                Some(blocker.unwrap_or(ScanPhase::PreconditionBlocked)),
            ),
        };

        // Allocation and installation happen under one lock so a newer
        // generation can never be replaced by an older one.
        let cancel = CancellationToken::new();
        let (generation, previous) = {
            let mut active = self.active.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.progress
                .begin(generation, (!subnet.is_empty()).then_some(subnet.as_str()));
            let previous = match phase {
                Some(_) => active.take(),
                None => {
                    *self.last_accepted.lock() = Some(AcceptedScan {
                        at_ms: now_ms(),
                        subnet: subnet.clone(),
                    });
                    active.replace(ActiveScan {
                        generation,
                        cancel: cancel.clone(),
                    })
                }
            };
            (generation, previous)
        };

        if let Some(previous) = previous {
            previous.cancel.cancel();
            tracing::info!(
                "Scan generation {} superseded by generation {}",
                previous.generation,
                generation
            );
        }

        if let Some(phase) = phase {
            let message = match (&checked.reason, checked.ready) {
                (Some(reason), _) => reason.as_str(),
                (None, true) => "scan blocked: missing subnet (permission or network unavailable)",
                (None, false) => "scan blocked: prerequisites not met",
            };
            let fix_action = checked.fix_action.as_deref().or(match phase {
                ScanPhase::PermissionBlocked => Some(super::preconditions::FIX_APP_SETTINGS),
                _ => None,
            });
            self.progress.block(generation, phase, message, fix_action);
            tracing::warn!(generation, phase = %phase, "Scan blocked: {}", message);
            return self.outcome(ScanDisposition::Blocked(phase));
        }

        let pipeline = match request.timeout_ms {
            Some(ms) => self.pipeline.with_settings(
                self.pipeline
                    .settings()
                    .clone()
                    .with_connect_timeout(Duration::from_millis(ms)),
            ),
            None => self.pipeline.clone(),
        };

        tracing::info!(generation, subnet = %subnet, trigger = %request.trigger, "Starting scan");
        tokio::spawn(Arc::clone(self).run(generation, subnet, pipeline, cancel));

        self.outcome(ScanDisposition::Started { generation })
    }

    /// Cancel the active generation. Returns whether anything was running.
    pub fn stop(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(active) if !active.cancel.is_cancelled() => {
                active.cancel.cancel();
                tracing::info!("Scan generation {} cancellation requested", active.generation);
                true
            }
            _ => false,
        }
    }

    /// Resolves once the latest generation has left `QUEUED`/`SCANNING`.
    pub async fn wait_until_settled(&self) {
        let mut rx = self.progress.subscribe();
        let _ = rx
            .wait_for(|p| {
                p.generation == self.generation.load(Ordering::SeqCst) && !p.phase.is_active()
            })
            .await;
    }

    fn is_throttled(&self, subnet: &str, now: i64) -> bool {
        match self.last_accepted.lock().as_ref() {
            Some(last) => last.subnet == subnet && now - last.at_ms < self.min_interval_ms,
            None => false,
        }
    }

    fn outcome(&self, disposition: ScanDisposition) -> ScanOutcome {
        ScanOutcome {
            disposition,
            devices: self.results(),
        }
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        subnet: String,
        pipeline: ProbePipeline,
        cancel: CancellationToken,
    ) {
        let targets = cidr::expand(&subnet, self.max_targets);
        let total = targets.len();
        self.progress.advance(generation, ScanPhase::Scanning, |p| {
            p.message = Some(format!("Scanning {} hosts", total));
            p.fix_action = None;
        });

        let arp = Arc::new(pipeline.read_neighbors().await);
        tracing::debug!("Generation {}: {} ARP entries, {} targets", generation, arp.len(), total);

        let counters = Arc::new(RunCounters::default());
        let mut set = JoinSet::new();

        for ip in targets {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let this = Arc::clone(&self);
            let pipeline = pipeline.clone();
            let arp = Arc::clone(&arp);
            let cancel = cancel.clone();
            let counters = Arc::clone(&counters);

            set.spawn(async move {
                let _permit = permit;
                this.probe_one(generation, ip, &pipeline, &arp, &cancel, &counters, total)
                    .await;
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Probe task failed: {}", e);
                failed += 1;
            }
        }

        self.flush_registry().await;

        let found = counters.found.load(Ordering::Relaxed);
        if cancel.is_cancelled() {
            self.progress.advance(generation, ScanPhase::Cancelled, |p| {
                p.devices_found = found;
                p.message = Some("Scan cancelled".to_string());
            });
            tracing::info!(generation, subnet = %subnet, "Scan cancelled after {} devices", found);
        } else {
            let error = (failed > 0).then(|| format!("{} probe tasks failed", failed));
            self.progress.advance(generation, ScanPhase::Complete, |p| {
                p.progress_pct = 100;
                p.devices_found = found;
                p.message = Some(format!("Found {} devices", found));
                p.last_scan_error = error;
            });
            self.last_scan_at.store(now_ms(), Ordering::Relaxed);
            tracing::info!(generation, subnet = %subnet, "Scan complete: {} devices", found);
        }

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.generation == generation) {
            *active = None;
        }
    }

    /// One durable write per generation, off the async workers.
    async fn flush_registry(&self) {
        let registry = Arc::clone(&self.registry);
        if let Err(e) = tokio::task::spawn_blocking(move || registry.flush()).await {
            tracing::warn!("Registry flush task failed: {}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn probe_one(
        &self,
        generation: u64,
        ip: Ipv4Addr,
        pipeline: &ProbePipeline,
        arp: &ArpTable,
        cancel: &CancellationToken,
        counters: &RunCounters,
        total: usize,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        match pipeline.probe(ip, arp, cancel).await {
            ProbeOutcome::Found(device) => {
                let observation = self.registry.observe(device, now_ms());
                self.record_found(generation, observation.device.id);
                counters.found.fetch_add(1, Ordering::Relaxed);
            }
            ProbeOutcome::Dark => {
                let swept = self.registry.mark_offline_by_ip(&ip.to_string(), now_ms());
                if !swept.is_empty() {
                    tracing::debug!("{} went dark, marked {} device(s) offline", ip, swept.len());
                }
            }
            ProbeOutcome::Cancelled => return,
        }

        let done = counters.done.fetch_add(1, Ordering::Relaxed) + 1;
        let found = counters.found.load(Ordering::Relaxed);
        self.progress.advance(generation, ScanPhase::Scanning, |p| {
            // 100 is reserved for COMPLETE
            p.progress_pct = progress::percent(done, total).min(99);
            p.devices_found = found;
        });
    }

    fn record_found(&self, generation: u64, id: String) {
        let mut results = self.results.write();
        match results.as_mut() {
            Some(current) if current.generation == generation => {
                if !current.ids.contains(&id) {
                    current.ids.push(id);
                }
            }
            Some(current) if current.generation > generation => {}
            _ => {
                *results = Some(GenerationResults {
                    generation,
                    ids: vec![id],
                });
            }
        }
    }
}
