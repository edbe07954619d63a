//! Error types for the lanwatch core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Rejected user input. Raised before any network action is taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid CIDR '{0}'")]
    Cidr(String),

    #[error("invalid IPv4 address '{0}'")]
    Ip(String),

    #[error("invalid MAC address '{0}'")]
    Mac(String),

    #[error("port {0} out of range 1-65535")]
    Port(i64),

    #[error("timeout {0}ms out of range 0-{max}ms", max = crate::validation::MAX_TIMEOUT_MS)]
    Timeout(i64),
}

/// Persistence failures. Callers in the engine log and swallow these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no storage location available")]
    NoLocation,
}

/// A gateway session could not deliver a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Wire-level rejection codes for gateway messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    #[error("MALFORMED_JSON")]
    MalformedJson,
    #[error("UNKNOWN_TYPE")]
    UnknownType,
    #[error("MISSING_NODE_ID")]
    MissingNodeId,
    #[error("UNSUPPORTED_PROTOCOL_VERSION")]
    UnsupportedProtocolVersion,
    #[error("MISSING_PAYLOAD")]
    MissingPayload,
    /// HEARTBEAT or RESULT with no node id and no session identity.
    #[error("UNREGISTERED_NODE")]
    UnregisteredNode,
    /// A mutation arrived on a session that never completed HELLO.
    #[error("NOT_REGISTERED")]
    NotRegistered,
}

impl GatewayErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedJson => "MALFORMED_JSON",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::MissingNodeId => "MISSING_NODE_ID",
            Self::UnsupportedProtocolVersion => "UNSUPPORTED_PROTOCOL_VERSION",
            Self::MissingPayload => "MISSING_PAYLOAD",
            Self::UnregisteredNode => "UNREGISTERED_NODE",
            Self::NotRegistered => "NOT_REGISTERED",
        }
    }
}

/// Result type alias for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing or invalid API token")]
    Unauthorized,

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("too many requests")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound(_, _) => (StatusCode::NOT_FOUND, "not_found"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error,
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_code_display_matches_wire_name() {
        let code = GatewayErrorCode::UnsupportedProtocolVersion;
        assert_eq!(code.to_string(), code.as_str());
        assert_eq!(
            serde_json::to_value(code).unwrap(),
            serde_json::json!("UNSUPPORTED_PROTOCOL_VERSION")
        );
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(ValidationError::Port(0)).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
