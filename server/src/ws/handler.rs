use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};

use gather_wire::PushPayload;

use crate::auth::jwt;
use crate::auth::middleware::session_token_from_headers;
use crate::state::AppState;
use crate::ws::session;

/// Close code sent when the upgrade carried no usable session credential.
/// Non-1000, so the client treats it like any other abnormal close and
/// recovers through its ordinary backoff.
const CLOSE_AUTH_FAILED: u16 = 4001;

/// GET /ws
/// WebSocket upgrade endpoint. Identity comes from the same session cookie
/// (or bearer header) as REST calls; there is no in-band login frame.
/// On auth failure, upgrades anyway so an `error` payload can be delivered,
/// then immediately closes. On success, spawns the session actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = session_token_from_headers(&headers)
        .ok_or(())
        .and_then(|token| {
            jwt::validate_session_token(&state.session_secret, &token).map_err(|_| ())
        });

    match claims {
        Ok(claims) => {
            tracing::info!(
                user_id = %claims.sub,
                handle = %claims.handle,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| session::run_connection(socket, state, claims.sub))
        }
        Err(()) => {
            tracing::warn!("WebSocket auth failed, closing with {}", CLOSE_AUTH_FAILED);

            // Upgrade so the error payload has a transport to ride on, then
            // close. If the socket dies before either send, nothing is lost:
            // the client sees an abnormal close and backs off normally.
            ws.on_upgrade(|mut socket: WebSocket| async move {
                let error = PushPayload::Error {
                    message: "authentication failed".to_string(),
                };
                if let Ok(text) = serde_json::to_string(&error) {
                    let _ = socket.send(Message::Text(text.into())).await;
                }
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_AUTH_FAILED,
                        reason: "authentication failed".into(),
                    })))
                    .await;
            })
        }
    }
}
