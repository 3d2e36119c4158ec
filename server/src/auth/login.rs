//! Session establishment endpoint.
//!
//! Identity management (passwords, OAuth, recovery) lives in the account
//! service; this server only needs an opaque, verifiable user id. Login here
//! provisions the user row on first sight and hands back a signed session
//! cookie that both REST and the WebSocket upgrade authenticate against.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::middleware::SESSION_COOKIE;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub handle: String,
    /// Also returned in the body for non-browser clients that cannot use
    /// the Set-Cookie header.
    pub token: String,
}

/// POST /api/auth/login: establish a session for a handle.
/// Auto-provisions the user row on first login. Rate-limited per IP.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let handle = body.handle.trim().to_string();
    if handle.is_empty() || handle.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let display_name = body
        .display_name
        .unwrap_or_else(|| handle.clone());

    let db = state.db.clone();
    let handle_for_db = handle.clone();
    let user_id = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE handle = ?1",
                rusqlite::params![handle_for_db],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
            })?;

        if let Some(id) = existing {
            return Ok::<_, StatusCode>(id);
        }

        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO users (id, handle, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, handle_for_db, display_name, Utc::now().to_rfc3339()],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let token = jwt::issue_session_token(&state.session_secret, &user_id, &handle)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = %user_id, handle = %handle, "Session established");

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token
    );
    let cookie_value =
        HeaderValue::from_str(&cookie).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        [(header::SET_COOKIE, cookie_value)],
        Json(LoginResponse {
            user_id,
            handle,
            token,
        }),
    ))
}
