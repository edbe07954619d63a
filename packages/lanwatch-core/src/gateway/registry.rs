//! Connected nodes and their sessions.
//!
//! One instance is built at startup and shared by handle. Every mutation is
//! followed by a snapshot broadcast to all attached sessions; sessions whose
//! send fails are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use super::protocol::GatewayMessage;
use crate::error::SessionError;
use crate::model::now_ms;

pub type SessionId = Uuid;

/// Outbound half of a node connection.
pub trait NodeSession: Send + Sync {
    fn send(&self, frame: &str) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    pub capabilities: Vec<String>,
    pub last_seen: i64,
    pub last_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub updated_at: i64,
}

struct NodeEntry {
    snapshot: NodeSnapshot,
    /// Session that last sent HELLO for this node
    owner: Option<SessionId>,
}

pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeEntry>>,
    sessions: RwLock<HashMap<SessionId, Arc<dyn NodeSession>>>,
    started_at: i64,
    closed: AtomicBool,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            started_at: now_ms(),
            closed: AtomicBool::new(false),
        }
    }

    /// Start delivering snapshots to `session`.
    pub fn attach(&self, session: Arc<dyn NodeSession>) -> SessionId {
        let id = Uuid::new_v4();
        if self.closed.load(Ordering::SeqCst) {
            return id;
        }
        self.sessions.write().insert(id, session);
        tracing::debug!("Gateway session {} attached", id);
        id
    }

    /// Stop delivering to `session`. If it owns `node_id`, the node is
    /// unregistered and one final snapshot is broadcast.
    pub fn detach(&self, session: SessionId, node_id: Option<&str>) {
        self.sessions.write().remove(&session);
        tracing::debug!("Gateway session {} detached", session);

        if let Some(node_id) = node_id {
            self.detach_node(session, node_id);
        }
    }

    /// Unregister `node_id` if `session` still owns it.
    pub fn detach_node(&self, session: SessionId, node_id: &str) {
        let removed = {
            let mut nodes = self.nodes.write();
            let owned = nodes
                .get(node_id)
                .is_some_and(|entry| entry.owner.is_none_or(|owner| owner == session));
            owned && nodes.remove(node_id).is_some()
        };
        if removed {
            tracing::info!("Node {} disconnected", node_id);
            self.broadcast();
        }
    }

    /// Create or refresh a node. An empty capability list keeps the
    /// previously announced capabilities; the last result is kept.
    pub fn register(
        &self,
        node_id: &str,
        capabilities: Vec<String>,
        session: Option<SessionId>,
        now_ms: i64,
    ) -> NodeSnapshot {
        let snapshot = {
            let mut nodes = self.nodes.write();
            let previous = nodes.remove(node_id);
            let capabilities = match (&previous, capabilities.is_empty()) {
                (Some(prev), true) => prev.snapshot.capabilities.clone(),
                _ => capabilities,
            };
            let snapshot = NodeSnapshot {
                id: node_id.to_string(),
                capabilities,
                last_seen: now_ms,
                last_result: previous.and_then(|p| p.snapshot.last_result),
            };
            nodes.insert(
                node_id.to_string(),
                NodeEntry {
                    snapshot: snapshot.clone(),
                    owner: session,
                },
            );
            snapshot
        };
        tracing::info!("Node {} registered with {:?}", node_id, snapshot.capabilities);
        self.broadcast();
        snapshot
    }

    pub fn heartbeat(&self, node_id: &str, now_ms: i64) {
        self.touch(node_id, now_ms, |_| {});
        self.broadcast();
    }

    pub fn result(&self, node_id: &str, payload: String, now_ms: i64) {
        self.touch(node_id, now_ms, move |snapshot| snapshot.last_result = Some(payload));
        self.broadcast();
    }

    /// Remove a node regardless of owner. Returns whether it existed.
    pub fn unregister(&self, node_id: &str) -> bool {
        let removed = self.nodes.write().remove(node_id).is_some();
        if removed {
            self.broadcast();
        }
        removed
    }

    /// Apply an already validated message on behalf of `session`.
    pub fn apply(&self, message: GatewayMessage, session: Option<SessionId>, now_ms: i64) {
        match message {
            GatewayMessage::Hello {
                node_id,
                capabilities,
                ..
            } => {
                self.register(&node_id, capabilities, session, now_ms);
            }
            GatewayMessage::Heartbeat { node_id } => self.heartbeat(&node_id, now_ms),
            GatewayMessage::Result { node_id, payload } => self.result(&node_id, payload, now_ms),
        }
    }

    /// All nodes sorted by id.
    pub fn list(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<NodeSnapshot> = self
            .nodes
            .read()
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot {
            nodes: self.list(),
            updated_at: now_ms(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn uptime_ms(&self) -> i64 {
        now_ms() - self.started_at
    }

    /// Push the current snapshot to every session. Returns how many
    /// sessions received it.
    pub fn broadcast(&self) -> usize {
        let frame = match serde_json::to_string(&self.snapshot()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to serialize gateway snapshot: {}", e);
                return 0;
            }
        };

        let sessions: Vec<(SessionId, Arc<dyn NodeSession>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, session)| (*id, Arc::clone(session)))
            .collect();

        let mut failed = Vec::new();
        for (id, session) in &sessions {
            if let Err(e) = session.send(&frame) {
                tracing::debug!("Dropping gateway session {}: {}", id, e);
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            let mut live = self.sessions.write();
            for id in &failed {
                live.remove(id);
            }
        }
        sessions.len() - failed.len()
    }

    /// Unregister nodes not seen within `grace_ms`. Broadcasts once if any
    /// were removed.
    pub fn prune_stale(&self, grace_ms: i64, now_ms: i64) -> Vec<String> {
        let stale: Vec<String> = {
            let mut nodes = self.nodes.write();
            let stale: Vec<String> = nodes
                .values()
                .filter(|entry| now_ms - entry.snapshot.last_seen > grace_ms)
                .map(|entry| entry.snapshot.id.clone())
                .collect();
            for id in &stale {
                nodes.remove(id);
            }
            stale
        };

        if !stale.is_empty() {
            tracing::info!("Pruned {} stale node(s): {:?}", stale.len(), stale);
            self.broadcast();
        }
        stale
    }

    /// Drop every node and session. Later attaches are ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sessions.write().clear();
        self.nodes.write().clear();
        tracing::info!("Node registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn touch(&self, node_id: &str, now_ms: i64, edit: impl FnOnce(&mut NodeSnapshot)) {
        let mut nodes = self.nodes.write();
        let entry = nodes.entry(node_id.to_string()).or_insert_with(|| NodeEntry {
            snapshot: NodeSnapshot {
                id: node_id.to_string(),
                capabilities: Vec::new(),
                last_seen: now_ms,
                last_result: None,
            },
            owner: None,
        });
        entry.snapshot.last_seen = now_ms;
        edit(&mut entry.snapshot);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSession;
    use super::*;

    #[test]
    fn test_register_broadcasts_sorted_snapshot() {
        let registry = NodeRegistry::new();
        let session = Arc::new(RecordingSession::default());
        let id = registry.attach(session.clone());

        registry.register("node-b", vec!["scan".into()], Some(id), 10);
        registry.register("node-a", vec![], None, 20);

        let snapshot = session.last_snapshot().unwrap();
        let ids: Vec<&str> = snapshot["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["node-a", "node-b"]);
        assert_eq!(snapshot["nodes"][1]["capabilities"][0], "scan");
        assert!(snapshot["updatedAt"].is_i64());
        assert_eq!(session.count(), 2);
    }

    #[test]
    fn test_reregister_keeps_capabilities_and_result() {
        let registry = NodeRegistry::new();
        registry.register("n1", vec!["scan".into(), "ping".into()], None, 1);
        registry.result("n1", "done".into(), 2);
        let again = registry.register("n1", vec![], None, 3);

        assert_eq!(again.capabilities, vec!["scan", "ping"]);
        assert_eq!(again.last_result.as_deref(), Some("done"));
        assert_eq!(again.last_seen, 3);
    }

    #[test]
    fn test_heartbeat_and_result_update_last_seen() {
        let registry = NodeRegistry::new();
        registry.register("n1", vec![], None, 100);
        registry.heartbeat("n1", 200);
        assert_eq!(registry.list()[0].last_seen, 200);

        registry.result("n1", "{\"ok\":true}".into(), 300);
        let node = &registry.list()[0];
        assert_eq!(node.last_seen, 300);
        assert_eq!(node.last_result.as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn test_detach_unregisters_owned_node_once() {
        let registry = NodeRegistry::new();
        let watcher = Arc::new(RecordingSession::default());
        registry.attach(watcher.clone());
        let node_session = Arc::new(RecordingSession::default());
        let sid = registry.attach(node_session);

        registry.register("n1", vec![], Some(sid), 1);
        let before = watcher.count();
        registry.detach(sid, Some("n1"));

        assert_eq!(registry.node_count(), 0);
        assert_eq!(watcher.count(), before + 1);
        assert_eq!(watcher.last_snapshot().unwrap()["nodes"], serde_json::json!([]));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_detach_leaves_node_claimed_by_newer_session() {
        let registry = NodeRegistry::new();
        let old = registry.attach(Arc::new(RecordingSession::default()));
        let new = registry.attach(Arc::new(RecordingSession::default()));

        registry.register("n1", vec![], Some(old), 1);
        registry.register("n1", vec![], Some(new), 2);
        registry.detach(old, Some("n1"));

        assert_eq!(registry.node_count(), 1);
    }

    #[test]
    fn test_failed_sessions_are_dropped() {
        let registry = NodeRegistry::new();
        let good = Arc::new(RecordingSession::default());
        let bad = Arc::new(RecordingSession::default());
        bad.fail.store(true, Ordering::SeqCst);
        registry.attach(good.clone());
        registry.attach(bad);

        assert_eq!(registry.broadcast(), 1);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_prune_stale_nodes() {
        let registry = NodeRegistry::new();
        let watcher = Arc::new(RecordingSession::default());
        registry.attach(watcher.clone());
        registry.register("old", vec![], None, 1_000);
        registry.register("fresh", vec![], None, 50_000);
        let before = watcher.count();

        let pruned = registry.prune_stale(45_000, 60_000);
        assert_eq!(pruned, vec!["old".to_string()]);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(watcher.count(), before + 1);

        assert!(registry.prune_stale(45_000, 60_000).is_empty());
        assert_eq!(watcher.count(), before + 1);
    }

    #[test]
    fn test_close_drops_everything() {
        let registry = NodeRegistry::new();
        registry.attach(Arc::new(RecordingSession::default()));
        registry.register("n1", vec![], None, 1);
        registry.close();

        assert!(registry.is_closed());
        assert_eq!(registry.node_count(), 0);
        assert_eq!(registry.session_count(), 0);
        registry.attach(Arc::new(RecordingSession::default()));
        assert_eq!(registry.session_count(), 0);
    }
}
