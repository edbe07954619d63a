//! WebSocket transport for the node gateway at `/openclaw/ws`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::{ApiError, ApiResult, SessionError};
use crate::gateway::{FrameOutcome, GatewaySession, NodeRegistry, NodeSession};

/// How long the writer gets to flush a close frame after the reader stops.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames queued for one socket before it counts as not reading.
const SESSION_QUEUE_CAPACITY: usize = 64;

/// Outbound half of a socket as seen by the node registry.
///
/// A full queue fails the send, which makes the registry drop the session,
/// and trips `overflow` so the socket handler closes the connection.
struct WsSink {
    tx: mpsc::Sender<Message>,
    overflow: CancellationToken,
}

impl NodeSession for WsSink {
    fn send(&self, frame: &str) -> Result<(), SessionError> {
        match self.tx.try_send(Message::Text(frame.to_owned().into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.overflow.cancel();
                Err(SessionError::Send("outbound queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::Closed),
        }
    }
}

pub async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> ApiResult<Response> {
    if state.nodes.is_closed() {
        return Err(ApiError::Internal("gateway is shutting down".to_string()));
    }
    let nodes = Arc::clone(&state.nodes);
    Ok(ws.on_upgrade(move |socket| handle_node_socket(socket, nodes)))
}

async fn handle_node_socket(socket: WebSocket, nodes: Arc<NodeRegistry>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(SESSION_QUEUE_CAPACITY);
    let overflow = CancellationToken::new();

    let sink = WsSink {
        tx: tx.clone(),
        overflow: overflow.clone(),
    };
    let mut session = GatewaySession::open(Arc::clone(&nodes), Arc::new(sink));
    let session_id = session.id();
    info!(session = %session_id, "Node connection opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let FrameOutcome::Close { code, reason } = session.handle_frame(text.as_str()) {
                        let frame = CloseFrame { code, reason: reason.into() };
                        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, tx.send(Message::Close(Some(frame)))).await;
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(session = %session_id, "Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session = %session_id, error = %e, "Node connection error");
                    break;
                }
            },
            _ = overflow.cancelled() => {
                warn!(session = %session_id, "Node is not reading its socket, closing");
                break;
            }
            _ = &mut send_task => {
                writer_done = true;
                break;
            }
        }
    }

    let node_id = session.node_id().map(str::to_string);
    // Detaching unregisters the node and broadcasts the final snapshot.
    drop(session);
    drop(tx);
    if !writer_done && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    info!(session = %session_id, node = ?node_id, "Node connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(capacity: usize) -> (WsSink, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = WsSink {
            tx,
            overflow: CancellationToken::new(),
        };
        (sink, rx)
    }

    #[test]
    fn test_full_queue_fails_send_and_trips_overflow() {
        let (sink, mut rx) = sink(2);
        assert!(sink.send("a").is_ok());
        assert!(sink.send("b").is_ok());
        assert!(!sink.overflow.is_cancelled());

        assert!(matches!(sink.send("c"), Err(SessionError::Send(_))));
        assert!(sink.overflow.is_cancelled());

        // Only the frames that fit were queued
        assert!(matches!(rx.try_recv(), Ok(Message::Text(t)) if t.as_str() == "a"));
        assert!(matches!(rx.try_recv(), Ok(Message::Text(t)) if t.as_str() == "b"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_reports_closed() {
        let (sink, rx) = sink(2);
        drop(rx);
        assert!(matches!(sink.send("a"), Err(SessionError::Closed)));
        assert!(!sink.overflow.is_cancelled());
    }

    #[test]
    fn test_slow_session_is_dropped_from_broadcast() {
        let nodes = Arc::new(NodeRegistry::new());
        let (slow, _rx) = sink(1);
        let overflow = slow.overflow.clone();
        let _session = GatewaySession::open(Arc::clone(&nodes), Arc::new(slow));

        // Fill the single slot, then the next snapshot overflows
        nodes.broadcast();
        assert_eq!(nodes.broadcast(), 0);
        assert!(overflow.is_cancelled());
    }
}
