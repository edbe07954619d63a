//! HTTP and WebSocket surface.
//!
//! All routes except `/health` sit behind the shared-secret check in
//! [`auth`] when `server.api_token` is configured.

pub mod auth;
pub mod devices;
pub mod discovery;
pub mod events;
pub mod gateway;
pub mod system;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::gateway::NodeRegistry;
use crate::registry::DeviceRegistry;
use crate::resilience::RateLimiter;
use crate::scan::ScanCoordinator;

/// Shared state handed to every handler.
pub struct AppState {
    pub coordinator: Arc<ScanCoordinator>,
    pub nodes: Arc<NodeRegistry>,
    pub config: Arc<Config>,
    pub tokens: auth::ApiTokens,
    unauthorized: RateLimiter,
    scan_requests: RateLimiter,
    token_rotations: RateLimiter,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, coordinator: Arc<ScanCoordinator>, nodes: Arc<NodeRegistry>) -> Self {
        let server = &config.server;
        let unauthorized = RateLimiter::per_second(server.unauthorized_burst, server.unauthorized_refill_per_sec);
        let scan_requests = RateLimiter::per_second(server.scan_request_burst, server.scan_request_refill_per_sec);
        let token_rotations = RateLimiter::per_second(server.token_rotate_burst, server.token_rotate_refill_per_sec);
        let tokens = auth::ApiTokens::new(server.api_token.clone());
        Self {
            coordinator,
            nodes,
            config,
            tokens,
            unauthorized,
            scan_requests,
            token_rotations,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        self.coordinator.registry()
    }

    /// Drop idle rate-limiter buckets.
    pub fn prune_limiters(&self, now_ms: i64) -> usize {
        self.unauthorized.prune(now_ms) + self.scan_requests.prune(now_ms) + self.token_rotations.prune(now_ms)
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(system::get_metrics))
        .route("/system/token/rotate", post(system::rotate_token))
        .route("/discovery/scan", post(discovery::start_scan))
        .route("/discovery/results", get(discovery::get_results))
        .route("/discovery/progress", get(discovery::get_progress))
        .route("/discovery/stop", post(discovery::stop_scan))
        .route("/discovery/preconditions", get(discovery::get_preconditions))
        .route("/export/devices", get(devices::export_devices))
        .route("/devices/{id}", get(devices::get_device))
        .route("/devices/{id}/meta", get(devices::get_meta).put(devices::put_meta))
        .route("/devices/{id}/history", get(devices::get_history))
        .route("/devices/{id}/uptime", get(devices::get_uptime))
        .route("/events/stream", get(events::stream_events))
        .route("/openclaw/ws", get(gateway::ws_upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_token))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub devices: usize,
    pub nodes: usize,
    pub last_scan_at: Option<i64>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        devices: state.registry().len(),
        nodes: state.nodes.node_count(),
        last_scan_at: state.coordinator.last_scan_at(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::resilience::RetryPolicy;
    use crate::scan::preconditions::testing::FixedPreconditions;
    use crate::scanner::oui::OuiDb;
    use crate::scanner::probe::testing::{FakeHost, FakeProber};
    use crate::scanner::{ProbePipeline, ProbeSettings};
    use crate::store::MemoryStore;

    /// State over a fake network where 10.0.1.2 answers ICMP on `10.0.1.0/29`.
    pub fn state_with(config: Config) -> Arc<AppState> {
        let prober = FakeProber::default().with_host(
            Ipv4Addr::new(10, 0, 1, 2),
            FakeHost {
                icmp: true,
                ..Default::default()
            },
        );
        let registry = Arc::new(DeviceRegistry::new(Arc::new(MemoryStore::default()), 100));
        let pipeline = ProbePipeline::new(
            Arc::new(prober),
            Arc::new(OuiDb::default()),
            RetryPolicy::no_retry(),
            ProbeSettings::default(),
        );
        let coordinator = Arc::new(ScanCoordinator::new(
            &config.scan,
            registry,
            pipeline,
            Arc::new(FixedPreconditions::ready("10.0.1.0/29")),
        ));
        Arc::new(AppState::new(Arc::new(config), coordinator, Arc::new(NodeRegistry::new())))
    }

    pub fn state() -> Arc<AppState> {
        state_with(Config::default())
    }
}
