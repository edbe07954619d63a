//! Control channel for remote node agents.
//!
//! Nodes connect over WebSocket, announce themselves with HELLO and then
//! send HEARTBEAT and RESULT frames. Every accepted frame mutates the
//! [`NodeRegistry`], which pushes a fresh snapshot to all connections.

pub mod protocol;
pub mod registry;
pub mod session;

pub use protocol::{GatewayError, GatewayMessage, MessageType, Validation, validate};
pub use registry::{GatewaySnapshot, NodeRegistry, NodeSession, NodeSnapshot, SessionId};
pub use session::{FrameOutcome, GatewaySession};
