//! Node gateway wire protocol.
//!
//! Inbound frames are JSON objects
//! `{type, nodeId?, protocolVersion?, capabilities?, payload?}`.
//! [`validate`] turns a frame into either a fully checked
//! [`GatewayMessage`] or a [`GatewayError`]; there is no partial result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayErrorCode;

pub const PROTOCOL_VERSION: i64 = 1;

/// WebSocket close codes used when a frame is rejected.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Hello,
    Heartbeat,
    Result,
}

impl MessageType {
    /// Case-insensitive match on the wire name.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "HELLO" => Some(Self::Hello),
            "HEARTBEAT" => Some(Self::Heartbeat),
            "RESULT" => Some(Self::Result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayMessage {
    Hello {
        node_id: String,
        protocol_version: i64,
        capabilities: Vec<String>,
    },
    Heartbeat {
        node_id: String,
    },
    Result {
        node_id: String,
        /// Strings verbatim, other JSON values as compact text
        payload: String,
    },
}

impl GatewayMessage {
    pub fn node_id(&self) -> &str {
        match self {
            Self::Hello { node_id, .. }
            | Self::Heartbeat { node_id }
            | Self::Result { node_id, .. } => node_id,
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Self::Hello { .. } => MessageType::Hello,
            Self::Heartbeat { .. } => MessageType::Heartbeat,
            Self::Result { .. } => MessageType::Result,
        }
    }
}

/// Rejection sent back to the node as `{"error": CODE, "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayError {
    #[serde(rename = "error")]
    pub code: GatewayErrorCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn close_code(&self) -> u16 {
        match self.code {
            GatewayErrorCode::MalformedJson => CLOSE_INVALID_PAYLOAD,
            _ => CLOSE_POLICY_VIOLATION,
        }
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}","message":""}}"#, self.code.as_str())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(GatewayMessage),
    Invalid(GatewayError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    node_id: Option<String>,
    protocol_version: Option<i64>,
    capabilities: Option<Vec<String>>,
    payload: Option<Value>,
}

fn invalid(code: GatewayErrorCode, message: impl Into<String>) -> Validation {
    Validation::Invalid(GatewayError::new(code, message))
}

fn non_blank(id: Option<&str>) -> Option<String> {
    id.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Validate one inbound text frame.
///
/// `session_node_id` is the identity established by an earlier HELLO on the
/// same connection; for HEARTBEAT and RESULT it takes precedence over the
/// frame's own `nodeId`.
pub fn validate(text: &str, session_node_id: Option<&str>) -> Validation {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return invalid(GatewayErrorCode::MalformedJson, format!("invalid JSON: {}", e)),
    };
    if !value.is_object() {
        return invalid(GatewayErrorCode::MalformedJson, "message must be a JSON object");
    }
    let raw: RawMessage = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => return invalid(GatewayErrorCode::MalformedJson, format!("invalid field: {}", e)),
    };

    let Some(kind) = raw.kind.as_deref().and_then(MessageType::parse) else {
        return invalid(
            GatewayErrorCode::UnknownType,
            format!("unknown message type {:?}", raw.kind.unwrap_or_default()),
        );
    };

    match kind {
        MessageType::Hello => {
            let Some(node_id) = non_blank(raw.node_id.as_deref()) else {
                return invalid(GatewayErrorCode::MissingNodeId, "HELLO requires a nodeId");
            };
            let protocol_version = raw.protocol_version.unwrap_or(PROTOCOL_VERSION);
            if protocol_version != PROTOCOL_VERSION {
                return invalid(
                    GatewayErrorCode::UnsupportedProtocolVersion,
                    format!(
                        "protocol version {} not supported (expected {})",
                        protocol_version, PROTOCOL_VERSION
                    ),
                );
            }
            let capabilities = raw
                .capabilities
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            Validation::Valid(GatewayMessage::Hello {
                node_id,
                protocol_version,
                capabilities,
            })
        }
        MessageType::Heartbeat | MessageType::Result => {
            let identity = non_blank(session_node_id).or_else(|| non_blank(raw.node_id.as_deref()));
            let Some(node_id) = identity else {
                return invalid(
                    GatewayErrorCode::UnregisteredNode,
                    "send HELLO with a nodeId first",
                );
            };

            if kind == MessageType::Heartbeat {
                return Validation::Valid(GatewayMessage::Heartbeat { node_id });
            }

            let payload = match raw.payload {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => return invalid(GatewayErrorCode::MissingPayload, "RESULT requires a payload"),
            };
            Validation::Valid(GatewayMessage::Result { node_id, payload })
        }
    }
}
