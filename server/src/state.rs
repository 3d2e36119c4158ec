use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::dispatch::EventDispatcher;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Session token signing secret (256-bit random key)
    pub session_secret: Vec<u8>,
    /// Active WebSocket connections per user
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out of push payloads to the registry's live sockets
    pub dispatcher: EventDispatcher,
}

impl AppState {
    pub fn new(db: DbPool, session_secret: Vec<u8>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(registry.clone());
        Self {
            db,
            session_secret,
            registry,
            dispatcher,
        }
    }
}
