//! Fan-out of domain events to live sockets.
//!
//! Delivery is best-effort and at-most-once: no retry, no persistence of
//! undelivered pushes. A user who is offline at dispatch time simply misses
//! the event and reconciles through REST re-fetch after reconnecting. The
//! dispatcher never surfaces an error to the domain mutation that triggered
//! it. Durable writes and realtime delivery are isolated from each other.

use std::sync::Arc;

use axum::extract::ws::Message;

use gather_wire::PushPayload;

use super::ConnectionRegistry;

/// Routes push payloads to every live connection of a target user.
/// Cheap to clone; handlers carry it inside AppState.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push a payload to all of the user's live sockets.
    ///
    /// Returns the number of sockets the payload was queued on, a status
    /// value for logging, never an error. A send failure means the receiving
    /// actor is gone, so the connection is dropped from the registry.
    ///
    /// Per-socket ordering: each connection has a single unbounded queue, so
    /// two dispatch calls against the same socket arrive in call order. No
    /// cross-socket ordering is guaranteed.
    pub fn dispatch(&self, user_id: &str, payload: &PushPayload) -> usize {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize push payload");
                return 0;
            }
        };

        let mut delivered = 0usize;
        for conn in self.registry.resolve(user_id) {
            match conn.sender.send(Message::Text(text.clone().into())) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Receiver dropped: the session actor already exited.
                    tracing::debug!(
                        user_id = %user_id,
                        conn_id = %conn.conn_id,
                        "Dropping dead connection found during dispatch"
                    );
                    self.registry.unregister(user_id, conn.conn_id);
                }
            }
        }

        tracing::debug!(
            user_id = %user_id,
            delivered = delivered,
            "Dispatched push payload"
        );
        delivered
    }
}
