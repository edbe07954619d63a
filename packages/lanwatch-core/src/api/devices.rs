//! `/devices/{id}` handlers and the inventory export.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::model::{Device, DeviceEvent, DeviceMeta, now_ms};
use crate::uptime::DAY_MS;

fn not_found(id: String) -> ApiError {
    ApiError::NotFound("device", id)
}

/// `GET /export/devices`: every known device, not just the last scan's.
pub async fn export_devices(State(state): State<Arc<AppState>>) -> Json<Vec<Device>> {
    Json(state.registry().all())
}

pub async fn get_device(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Device>> {
    state.registry().get(&id).map(Json).ok_or_else(|| not_found(id))
}

pub async fn get_meta(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<DeviceMeta>> {
    state
        .registry()
        .get(&id)
        .map(|device| Json(device.meta()))
        .ok_or_else(|| not_found(id))
}

/// Merge the non-null fields of the body into the device's metadata.
pub async fn put_meta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<DeviceMeta>,
) -> ApiResult<Json<DeviceMeta>> {
    let device = state.registry().update_meta(&id, patch).ok_or_else(|| not_found(id))?;
    tracing::info!(device = %device.id, "Device metadata updated");
    Ok(Json(device.meta()))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<DeviceEvent>>> {
    state.registry().history(&id).map(Json).ok_or_else(|| not_found(id))
}

#[derive(Debug, Serialize)]
pub struct UptimeResponse {
    #[serde(rename = "uptimePct24h")]
    pub uptime_pct_24h: f64,
}

pub async fn get_uptime(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<UptimeResponse>> {
    let pct = state
        .registry()
        .uptime_pct(&id, DAY_MS, now_ms())
        .ok_or_else(|| not_found(id))?;
    Ok(Json(UptimeResponse { uptime_pct_24h: pct }))
}

#[cfg(test)]
mod tests {
    use crate::api::{router, testing};
    use crate::model::{Device, now_ms};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn seeded() -> axum::Router {
        let state = testing::state();
        let mut device = Device::observed("10.0.1.7", Some("AA:BB:CC:00:11:22".to_string()));
        device.online = true;
        state.registry().observe(device, now_ms());
        router(state)
    }

    #[tokio::test]
    async fn test_unknown_device_is_404() {
        let app = seeded();
        let (status, body) = call(&app, get("/devices/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = call(&app, get("/devices/nope/uptime")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_device_case_insensitive() {
        let app = seeded();
        let (status, body) = call(&app, get("/devices/aa:bb:cc:00:11:22")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ip"], "10.0.1.7");
    }

    #[tokio::test]
    async fn test_meta_put_merges() {
        let app = seeded();
        let put = |body: &str| {
            Request::builder()
                .method("PUT")
                .uri("/devices/AA:BB:CC:00:11:22/meta")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let (status, body) = call(&app, put(r#"{"name":"NAS","room":"office"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "NAS");

        call(&app, put(r#"{"room":"attic","type":"storage"}"#)).await;
        let (_, body) = call(&app, get("/devices/AA:BB:CC:00:11:22/meta")).await;
        assert_eq!(body["name"], "NAS");
        assert_eq!(body["room"], "attic");
        assert_eq!(body["type"], "storage");
    }

    #[tokio::test]
    async fn test_export_includes_devices_outside_last_scan() {
        let app = seeded();
        let (status, body) = call(&app, get("/export/devices")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "AA:BB:CC:00:11:22");
    }

    #[tokio::test]
    async fn test_history_and_uptime() {
        let app = seeded();
        let (status, body) = call(&app, get("/devices/AA:BB:CC:00:11:22/history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["event"], "NEW_DEVICE");

        let (status, body) = call(&app, get("/devices/AA:BB:CC:00:11:22/uptime")).await;
        assert_eq!(status, StatusCode::OK);
        let pct = body["uptimePct24h"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&pct));
    }
}
