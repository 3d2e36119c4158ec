pub mod dispatch;
pub mod handler;
pub mod session;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use gather_wire::NORMAL_CLOSURE;

/// Type alias for the sender half of a WebSocket connection's channel.
/// One queue per socket: everything pushed through it reaches the client in
/// send order, which is the only ordering guarantee the dispatcher makes.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// One live socket belonging to a user. The registry entry exclusively owns
/// the send handle; sessions and the dispatcher work with clones of it.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub conn_id: Uuid,
    pub sender: ConnectionSender,
    pub connected_at: DateTime<Utc>,
    last_heartbeat_at: Arc<AtomicI64>,
}

impl ConnectionEntry {
    pub fn new(sender: ConnectionSender) -> Self {
        let now = Utc::now();
        Self {
            conn_id: Uuid::new_v4(),
            sender,
            connected_at: now,
            last_heartbeat_at: Arc::new(AtomicI64::new(now.timestamp())),
        }
    }

    /// Record heartbeat liveness. Called by the session actor on every pong.
    pub fn touch(&self) {
        self.last_heartbeat_at
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_heartbeat_at(&self) -> i64 {
        self.last_heartbeat_at.load(Ordering::Relaxed)
    }
}

/// Connection registry: tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs).
///
/// Explicitly owned service state, handed to the parts of the server that
/// need it, not a module-level singleton. Purely in-memory: nothing here
/// survives a restart, clients re-handshake.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Vec<ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for a user. Never rejects: concurrent connections
    /// from multiple tabs/devices all coexist.
    pub fn register(&self, user_id: &str, entry: ConnectionEntry) {
        self.connections
            .entry(user_id.to_string())
            .or_default()
            .push(entry);

        tracing::debug!(
            user_id = %user_id,
            connections = self.connection_count(user_id),
            "Connection registered"
        );
    }

    /// Remove exactly the matching connection. No-op if it was already
    /// removed; duplicate close events and teardown races are expected.
    pub fn unregister(&self, user_id: &str, conn_id: Uuid) {
        let mut removed = false;
        if let Some(mut entries) = self.connections.get_mut(user_id) {
            let before = entries.len();
            entries.retain(|e| e.conn_id != conn_id);
            removed = entries.len() != before;
        }
        // Drop empty per-user vectors so resolve() stays tidy
        self.connections
            .remove_if(user_id, |_, entries| entries.is_empty());

        if removed {
            tracing::debug!(user_id = %user_id, conn_id = %conn_id, "Connection unregistered");
        }
    }

    /// All live connections for a user. An empty result is a normal outcome
    /// (user offline), not an error.
    pub fn resolve(&self, user_id: &str) -> Vec<ConnectionEntry> {
        self.connections
            .get(user_id)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections.get(user_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Graceful shutdown: push a normal-closure close frame to every live
    /// socket so clients suppress their reconnection policy.
    pub fn close_all(&self, reason: &str) {
        let mut closed = 0usize;
        for entry in self.connections.iter() {
            for conn in entry.value().iter() {
                let _ = conn.sender.send(Message::Close(Some(CloseFrame {
                    code: NORMAL_CLOSURE,
                    reason: reason.to_string().into(),
                })));
                closed += 1;
            }
        }
        tracing::info!(connections = closed, "Sent close frames to all live connections");
    }
}
