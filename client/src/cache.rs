//! Cache invalidation router.
//!
//! Translates inbound push payloads into targeted invalidation of cached
//! query results so UI consumers re-fetch consistent data over REST. The
//! mapping itself is a pure function ([`route`]); [`CacheRouter`] applies it
//! against the consumer's cache seam. The router only marks entries stale;
//! it never mutates cached data.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use gather_wire::{NotificationKind, PushPayload};

/// Logical key for one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// GET /api/notifications/unread-count
    UnreadCount,
    /// GET /api/notifications
    NotificationList,
    /// GET /api/conversations
    ConversationList,
    /// GET /api/conversations/{id}/messages
    ConversationMessages(String),
}

/// The consumer's query cache seam. Invalidation must be idempotent:
/// marking an already-stale key is a no-op.
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

impl<C: QueryCache + ?Sized> QueryCache for std::sync::Arc<C> {
    fn invalidate(&self, key: &CacheKey) {
        (**self).invalidate(key)
    }
}

/// Ephemeral user-facing notice, surfaced outside the cache (toast, badge
/// flash). Consumers drain these from the router's notice channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    ChatMessage { body: String },
    ServerError { message: String },
}

/// What one payload routes to. Produced by the pure mapping so tests can
/// check it mechanically.
#[derive(Debug, Default, PartialEq)]
pub struct Routing {
    pub keys: Vec<CacheKey>,
    pub notice: Option<Notice>,
    /// Set when the payload confirms the authenticated session.
    pub authenticated: bool,
}

/// The payload-type → cache-key mapping. This is the router's only logic;
/// every payload type maps to a deterministic, enumerable set of keys.
pub fn route(payload: &PushPayload) -> Routing {
    match payload {
        PushPayload::NewNotification { notification } => Routing {
            keys: vec![CacheKey::UnreadCount, CacheKey::NotificationList],
            notice: (notification.kind == NotificationKind::ChatMessage).then(|| {
                Notice::ChatMessage {
                    body: notification.body.clone(),
                }
            }),
            authenticated: false,
        },
        PushPayload::NewMessage {
            conversation_id, ..
        } => {
            let mut keys = vec![CacheKey::ConversationList];
            if let Some(id) = conversation_id {
                keys.push(CacheKey::ConversationMessages(id.clone()));
            }
            Routing {
                keys,
                notice: None,
                authenticated: false,
            }
        }
        PushPayload::MessagesMarkedRead { conversation_id } => Routing {
            keys: vec![
                CacheKey::ConversationList,
                CacheKey::ConversationMessages(conversation_id.clone()),
            ],
            notice: None,
            authenticated: false,
        },
        PushPayload::AuthSuccess { .. } => Routing {
            keys: vec![],
            notice: None,
            authenticated: true,
        },
        PushPayload::Error { message } => Routing {
            keys: vec![],
            notice: Some(Notice::ServerError {
                message: message.clone(),
            }),
            authenticated: false,
        },
    }
}

/// Applies [`route`] to raw inbound frames: invalidates cache keys, emits
/// notices, and tracks whether the server has confirmed the session.
pub struct CacheRouter<C: QueryCache> {
    cache: C,
    notice_tx: mpsc::UnboundedSender<Notice>,
    authenticated: AtomicBool,
}

impl<C: QueryCache> CacheRouter<C> {
    /// Returns the router plus the receiver the consumer drains for
    /// transient notices.
    pub fn new(cache: C) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        (
            Self {
                cache,
                notice_tx,
                authenticated: AtomicBool::new(false),
            },
            notice_rx,
        )
    }

    /// Handle one raw text frame. Frames with an unknown `type` (or any
    /// other parse failure) are ignored: forward compatibility over
    /// strictness.
    pub fn handle_frame(&self, text: &str) {
        let payload = match serde_json::from_str::<PushPayload>(text) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unroutable frame");
                return;
            }
        };
        self.apply(&payload);
    }

    /// Apply the routing for one payload.
    pub fn apply(&self, payload: &PushPayload) {
        let routing = route(payload);
        for key in &routing.keys {
            self.cache.invalidate(key);
        }
        if routing.authenticated {
            self.authenticated.store(true, Ordering::Relaxed);
        }
        if let Some(notice) = routing.notice {
            let _ = self.notice_tx.send(notice);
        }
    }

    /// Called by the manager when the transport drops, so a fresh
    /// `auth_success` is required on the next connection.
    pub fn reset_authenticated(&self) {
        self.authenticated.store(false, Ordering::Relaxed);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

/// A minimal [`QueryCache`] that records stale keys. Enough for tests and
/// for consumers that poll `take_stale` to drive refetches.
#[derive(Debug, Default)]
pub struct StaleTracker {
    stale: Mutex<HashSet<CacheKey>>,
}

impl StaleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.stale.lock().map(|s| s.contains(key)).unwrap_or(false)
    }

    /// Drain and return every stale key.
    pub fn take_stale(&self) -> Vec<CacheKey> {
        self.stale
            .lock()
            .map(|mut s| s.drain().collect())
            .unwrap_or_default()
    }

    pub fn stale_count(&self) -> usize {
        self.stale.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl QueryCache for StaleTracker {
    fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut stale) = self.stale.lock() {
            // HashSet insert: invalidating twice equals invalidating once
            stale.insert(key.clone());
        }
    }
}
