//! Background loops run alongside the HTTP server.
//!
//! - Auto-scan: requests a scheduled scan every `scan.auto_scan_interval_ms`.
//! - Node sweep: unregisters nodes that stopped heartbeating.
//! - Store flush: writes pending device changes every `storage.flush_interval_ms`.
//!
//! All of them stop when the shared cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::config::Config;
use crate::gateway::NodeRegistry;
use crate::model::now_ms;
use crate::registry::DeviceRegistry;
use crate::scan::{ScanCoordinator, ScanDisposition, ScanRequest};

/// Request a scheduled scan every `every`, starting with one right away.
pub async fn run_auto_scan(coordinator: Arc<ScanCoordinator>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("Auto-scan every {}s", every.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = coordinator.request_scan(ScanRequest::scheduled()).await;
                match outcome.disposition {
                    ScanDisposition::Started { generation } => {
                        tracing::debug!(generation, "Scheduled scan started");
                    }
                    ScanDisposition::Throttled => tracing::debug!("Scheduled scan skipped: too soon"),
                    ScanDisposition::Blocked(phase) => tracing::warn!(phase = %phase, "Scheduled scan blocked"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    tracing::info!("Auto-scan stopped");
}

/// Prune nodes idle longer than `grace` every `every`.
pub async fn run_node_sweeper(nodes: Arc<NodeRegistry>, grace: Duration, every: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing can be stale yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pruned = nodes.prune_stale(grace.as_millis() as i64, now_ms());
                if !pruned.is_empty() {
                    tracing::info!(count = pruned.len(), "Stale nodes unregistered");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Write pending store changes every `every`, and once more on shutdown.
pub async fn run_store_flusher(registry: Arc<DeviceRegistry>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = shutdown.cancelled() => true,
        };
        let registry = Arc::clone(&registry);
        if let Err(e) = tokio::task::spawn_blocking(move || registry.flush()).await {
            tracing::warn!("Store flush task failed: {}", e);
        }
        if stopping {
            break;
        }
    }
}

/// Spawn every background loop the service runs. Intervals of zero
/// disable the corresponding loop.
pub fn spawn_background(config: &Config, state: &Arc<AppState>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if config.scan.auto_scan_interval_ms > 0 {
        handles.push(tokio::spawn(run_auto_scan(
            Arc::clone(&state.coordinator),
            Duration::from_millis(config.scan.auto_scan_interval_ms),
            shutdown.clone(),
        )));
    } else {
        tracing::info!("Auto-scan disabled");
    }

    if config.gateway.sweep_interval_ms > 0 {
        handles.push(tokio::spawn(run_node_sweeper(
            Arc::clone(&state.nodes),
            Duration::from_millis(config.gateway.heartbeat_grace_ms),
            Duration::from_millis(config.gateway.sweep_interval_ms),
            shutdown.clone(),
        )));
    }

    if config.storage.flush_interval_ms > 0 {
        handles.push(tokio::spawn(run_store_flusher(
            Arc::clone(state.registry()),
            Duration::from_millis(config.storage.flush_interval_ms),
            shutdown.clone(),
        )));
    }

    let limiter_state = Arc::clone(state);
    let token = shutdown.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter_state.prune_limiters(now_ms());
                }
                _ = token.cancelled() => break,
            }
        }
    }));

    handles
}
