//! Shared-secret authentication with per-client failure throttling.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use crate::model::now_ms;

pub const TOKEN_HEADER: &str = "x-api-token";

#[derive(Debug, Default)]
struct TokenState {
    current: Option<String>,
    /// Replaced token and the instant (ms) it stops being accepted
    previous: Option<(String, i64)>,
}

/// Result of a token rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub token: String,
    pub previous_valid_until: i64,
}

/// The accepted API token, rotatable at runtime.
///
/// Rotations live in memory only; a restart goes back to the configured token.
#[derive(Debug, Default)]
pub struct ApiTokens {
    state: RwLock<TokenState>,
}

impl ApiTokens {
    pub fn new(configured: Option<String>) -> Self {
        Self {
            state: RwLock::new(TokenState {
                current: configured.filter(|t| !t.trim().is_empty()),
                previous: None,
            }),
        }
    }

    /// Whether requests need a token at all.
    pub fn is_required(&self) -> bool {
        self.state.read().current.is_some()
    }

    /// Accept the current token, or the previous one inside its grace window.
    pub fn validate(&self, presented: Option<&str>, now_ms: i64) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        let state = self.state.read();
        if state.current.as_deref() == Some(presented) {
            return true;
        }
        matches!(&state.previous, Some((token, until)) if token == presented && now_ms <= *until)
    }

    /// Replace the current token with a fresh one. `None` when no token is
    /// configured, since rotating would silently turn authentication on.
    pub fn rotate(&self, grace_ms: u64, now_ms: i64) -> Option<Rotation> {
        let mut state = self.state.write();
        let current = state.current.take()?;
        let token = generate_token();
        let previous_valid_until = now_ms + grace_ms as i64;
        state.previous = Some((current, previous_valid_until));
        state.current = Some(token.clone());
        Some(Rotation {
            token,
            previous_valid_until,
        })
    }
}

fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Rate-limit key of the caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    fn from_request(request: &Request) -> Self {
        let key = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self(key)
    }
}

/// Token presented via `Authorization: Bearer` or `X-Api-Token`.
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    bearer
        .or_else(|| headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()).map(str::trim))
        .filter(|t| !t.is_empty())
}

pub async fn require_token(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    let client = ClientKey::from_request(&request);

    if state.tokens.is_required()
        && request.uri().path() != "/health"
        && !state.tokens.validate(presented_token(request.headers()), now_ms())
    {
        let allowed = state.unauthorized.try_consume(&client.0, 1.0, now_ms());
        tracing::warn!(client = %client.0, path = %request.uri().path(), throttled = !allowed, "Rejected unauthenticated request");
        return if allowed {
            ApiError::Unauthorized.into_response()
        } else {
            ApiError::RateLimited.into_response()
        };
    }

    request.extensions_mut().insert(client);
    next.run(request).await
}
