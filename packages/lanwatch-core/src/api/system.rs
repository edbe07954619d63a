//! `/metrics` and `/system/token/rotate`.

use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use serde::Serialize;

use super::AppState;
use super::auth::ClientKey;
use crate::error::{ApiError, ApiResult};
use crate::model::now_ms;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub uptime_ms: u64,
    pub devices_total: usize,
    pub devices_online: usize,
    pub nodes: usize,
    pub scanning: bool,
    pub last_scan_at: Option<i64>,
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let devices = state.registry().all();
    Json(MetricsResponse {
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        devices_total: devices.len(),
        devices_online: devices.iter().filter(|d| d.online).count(),
        nodes: state.nodes.node_count(),
        scanning: state.coordinator.is_scanning(),
        last_scan_at: state.coordinator.last_scan_at(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateResponse {
    pub ok: bool,
    pub token: String,
    pub previous_valid_until: i64,
}

/// Issue a new API token. The old one keeps working for
/// `server.token_grace_ms` so clients can switch over.
pub async fn rotate_token(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientKey>,
) -> ApiResult<Json<RotateResponse>> {
    let now = now_ms();
    if !state.token_rotations.try_consume(&client.0, 1.0, now) {
        tracing::warn!(client = %client.0, "Token rotation throttled");
        return Err(ApiError::RateLimited);
    }

    let rotation = state
        .tokens
        .rotate(state.config.server.token_grace_ms, now)
        .ok_or_else(|| ApiError::InvalidRequest("no API token is configured".to_string()))?;
    tracing::info!(
        client = %client.0,
        previous_valid_until = rotation.previous_valid_until,
        "API token rotated"
    );
    Ok(Json(RotateResponse {
        ok: true,
        token: rotation.token,
        previous_valid_until: rotation.previous_valid_until,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::{router, testing};
    use crate::config::Config;
    use crate::model::{Device, now_ms};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(app: &Router, method: &str, uri: &str, token: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn guarded() -> Router {
        let mut config = Config::default();
        config.server.api_token = Some("s3cret".to_string());
        router(testing::state_with(config))
    }

    #[tokio::test]
    async fn test_rotated_token_replaces_old_after_grace() {
        let app = guarded();
        let (status, body) = send(&app, "POST", "/system/token/rotate", "s3cret").await;
        assert_eq!(status, StatusCode::OK);
        let fresh = body["token"].as_str().unwrap().to_string();
        assert_ne!(fresh, "s3cret");
        let until = body["previousValidUntil"].as_i64().unwrap();
        assert!(until >= now_ms() + 4 * 60_000);

        // Both tokens work inside the grace window
        let (status, _) = send(&app, "GET", "/discovery/progress", &fresh).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/discovery/progress", "s3cret").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/discovery/progress", "guess").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_old_token_rejected_without_grace() {
        let mut config = Config::default();
        config.server.api_token = Some("s3cret".to_string());
        config.server.token_grace_ms = 0;
        let app = router(testing::state_with(config));

        let (_, body) = send(&app, "POST", "/system/token/rotate", "s3cret").await;
        let fresh = body["token"].as_str().unwrap().to_string();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let (status, _) = send(&app, "GET", "/discovery/progress", "s3cret").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/discovery/progress", &fresh).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotation_is_rate_limited() {
        let app = guarded();
        let (status, body) = send(&app, "POST", "/system/token/rotate", "s3cret").await;
        assert_eq!(status, StatusCode::OK);
        let second = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", "/system/token/rotate", &second).await;
        assert_eq!(status, StatusCode::OK);
        let third = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", "/system/token/rotate", &third).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limited");

        // The throttled attempt did not rotate
        let (status, _) = send(&app, "GET", "/discovery/progress", &third).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotation_refused_when_api_is_open() {
        let app = router(testing::state());
        let (status, body) = send(&app, "POST", "/system/token/rotate", "anything").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_metrics_counts_devices() {
        let state = testing::state();
        let mut online = Device::observed("10.0.1.3", Some("AA:BB:CC:00:00:03".to_string()));
        online.online = true;
        state.registry().observe(online, now_ms());
        state
            .registry()
            .observe(Device::observed("10.0.1.4", Some("AA:BB:CC:00:00:04".to_string())), now_ms());
        let app = router(state);

        let (status, body) = send(&app, "GET", "/metrics", "unused").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devicesTotal"], 2);
        assert_eq!(body["devicesOnline"], 1);
        assert_eq!(body["nodes"], 0);
        assert_eq!(body["scanning"], false);
        assert!(body["lastScanAt"].is_null());
    }
}
