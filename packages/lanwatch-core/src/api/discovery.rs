//! `/discovery/*` handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::auth::ClientKey;
use crate::error::{ApiError, ApiResult};
use crate::model::{Device, now_ms};
use crate::scan::{Preconditions, ScanDisposition, ScanProgress, ScanRequest};
use crate::validation::{validate_cidr, validate_timeout};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub subnet: Option<String>,
    pub timeout_ms: Option<i64>,
    #[serde(default)]
    pub force: bool,
}

impl ScanBody {
    /// Empty bodies mean "scan the local subnet with defaults".
    fn parse(body: &[u8]) -> ApiResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest(format!("invalid JSON body: {}", e)))
    }

    fn into_request(self) -> ApiResult<ScanRequest> {
        let subnet = match self.subnet.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(subnet) => {
                validate_cidr(subnet)?;
                Some(subnet)
            }
            None => None,
        };
        let timeout_ms = self.timeout_ms.map(validate_timeout).transpose()?;

        let request = ScanRequest::manual(subnet).with_timeout_ms(timeout_ms);
        Ok(if self.force { request.forced() } else { request })
    }
}

/// `POST /discovery/scan`: starts a scan in the background and answers at
/// once with the cached devices (202 when a generation was started).
pub async fn start_scan(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientKey>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Vec<Device>>)> {
    let request = ScanBody::parse(&body)?.into_request()?;

    if !state.scan_requests.try_consume(&client.0, 1.0, now_ms()) {
        return Err(ApiError::RateLimited);
    }

    let outcome = state.coordinator.request_scan(request).await;
    let status = match outcome.disposition {
        ScanDisposition::Started { .. } => StatusCode::ACCEPTED,
        ScanDisposition::Throttled | ScanDisposition::Blocked(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome.devices)))
}

pub async fn get_results(State(state): State<Arc<AppState>>) -> Json<Vec<Device>> {
    Json(state.coordinator.results())
}

pub async fn get_progress(State(state): State<Arc<AppState>>) -> Json<ScanProgress> {
    Json(state.coordinator.progress())
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub ok: bool,
    pub cancelled: bool,
}

pub async fn stop_scan(State(state): State<Arc<AppState>>) -> Json<StopResponse> {
    let cancelled = state.coordinator.stop();
    Json(StopResponse { ok: true, cancelled })
}

#[derive(Debug, Default, Deserialize)]
pub struct PreconditionsQuery {
    pub subnet: Option<String>,
}

pub async fn get_preconditions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreconditionsQuery>,
) -> ApiResult<Json<Preconditions>> {
    let subnet = query.subnet.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if let Some(subnet) = subnet {
        validate_cidr(subnet)?;
    }
    Ok(Json(state.coordinator.check_preconditions(subnet).await))
}
