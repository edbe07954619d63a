//! Per-connection gateway state, independent of the transport.

use std::sync::Arc;

use super::protocol::{self, GatewayError, GatewayMessage, Validation};
use super::registry::{NodeRegistry, NodeSession, SessionId};
use crate::error::GatewayErrorCode;
use crate::model::now_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// Close the connection with this WebSocket close code and reason.
    Close { code: u16, reason: String },
}

/// One node connection. Identity is fixed by the first valid HELLO; the
/// session detaches from the registry when dropped.
pub struct GatewaySession {
    id: SessionId,
    node_id: Option<String>,
    registry: Arc<NodeRegistry>,
    sink: Arc<dyn NodeSession>,
}

impl GatewaySession {
    pub fn open(registry: Arc<NodeRegistry>, sink: Arc<dyn NodeSession>) -> Self {
        let id = registry.attach(Arc::clone(&sink));
        Self {
            id,
            node_id: None,
            registry,
            sink,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn handle_frame(&mut self, text: &str) -> FrameOutcome {
        let message = match protocol::validate(text, self.node_id.as_deref()) {
            Validation::Valid(message) => message,
            Validation::Invalid(err) => return self.reject(err),
        };

        match message {
            GatewayMessage::Hello { ref node_id, .. } => {
                if let Some(previous) = self.node_id.take() {
                    if previous != *node_id {
                        self.registry.detach_node(self.id, &previous);
                    }
                }
                self.node_id = Some(node_id.clone());
            }
            _ if self.node_id.is_none() => {
                return self.reject(GatewayError::new(
                    GatewayErrorCode::NotRegistered,
                    "HELLO must be sent before HEARTBEAT or RESULT",
                ));
            }
            _ => {}
        }

        self.registry.apply(message, Some(self.id), now_ms());
        FrameOutcome::Continue
    }

    fn reject(&self, err: GatewayError) -> FrameOutcome {
        tracing::warn!(
            "Gateway session {} rejected frame: {} ({})",
            self.id,
            err.code,
            err.message
        );
        if let Err(e) = self.sink.send(&err.to_frame()) {
            tracing::debug!("Could not deliver gateway error to {}: {}", self.id, e);
        }
        FrameOutcome::Close {
            code: err.close_code(),
            reason: err.code.as_str().to_string(),
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.registry.detach(self.id, self.node_id.as_deref());
    }
}
