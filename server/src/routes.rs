//! Router assembly: REST surface, WebSocket upgrade, shared layers.

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;

use crate::auth::login;
use crate::auth::middleware::SessionSecret;
use crate::chat::{conversations, messages};
use crate::notifications;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Makes the signing secret available to the `Claims` extractor on every
/// request, WebSocket upgrades included.
async fn inject_session_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    request
        .extensions_mut()
        .insert(SessionSecret(state.session_secret.clone()));
    next.run(request).await
}

async fn health_check() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    // Login is the only unauthenticated mutation, so it gets a per-IP
    // budget: 10 requests burst, refilling one per second.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(1)
            .burst_size(10)
            .finish()
            .expect("Failed to build governor config"),
    );

    // The governor keeps per-IP state forever unless asked to forget
    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            limiter.retain_recent();
        }
    });

    let api = Router::new()
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/api/conversations/{id}/read", post(messages::mark_read))
        .route("/api/notifications", get(notifications::list_notifications))
        .route(
            "/api/notifications/unread-count",
            get(notifications::unread_count),
        );

    Router::new()
        .route(
            "/api/auth/login",
            post(login::login).layer(GovernorLayer {
                config: governor_config,
            }),
        )
        .merge(api)
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_session_secret,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
