//! Shared wire types for the GATHER realtime channel.
//!
//! Both the server and the client crate depend on these definitions, so the
//! JSON `type` tags below are the wire contract. Every push payload is
//! self-describing: a receiver can route on `type` alone, with no session
//! context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket close code for normal closure (logout, graceful server
/// shutdown). The client suppresses reconnection on this code; any other
/// code triggers the backoff policy.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A chat message as it appears on the wire and in REST responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// What a notification is about. Drives the client's decision to surface a
/// transient notice (chat messages do, the rest are badge-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ChatMessage,
    FriendRequest,
    EventReminder,
}

/// A user-facing notification row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub body: String,
    /// Set for chat-message notifications so the client can deep-link.
    pub conversation_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Server -> client push payload, sent as a UTF-8 JSON text frame.
///
/// Delivery is best-effort and at-most-once: a payload dispatched to an
/// offline user is dropped, and the client reconciles by re-fetching over
/// REST after the cache router marks the affected queries stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushPayload {
    NewNotification {
        notification: Notification,
    },
    NewMessage {
        message: ChatMessage,
        /// Duplicated at payload level so the router can target the
        /// per-conversation cache key without inspecting the message.
        conversation_id: Option<String>,
    },
    MessagesMarkedRead {
        conversation_id: String,
    },
    AuthSuccess {
        user_id: String,
    },
    Error {
        message: String,
    },
}

/// Client -> server application frame. Only accepted on an authenticated
/// session; anything that fails to parse is logged and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    MarkRead { conversation_id: String },
}
