//! Notification refetch targets: the unread badge and the notification list.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use gather_wire::{Notification, NotificationKind};

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_kind(raw: &str) -> NotificationKind {
    match raw {
        "friend_request" => NotificationKind::FriendRequest,
        "event_reminder" => NotificationKind::EventReminder,
        _ => NotificationKind::ChatMessage,
    }
}

/// GET /api/notifications/unread-count, the refetch target for the
/// `unread-count` cache key.
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let unread = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
            rusqlite::params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(UnreadCountResponse { unread }))
}

/// GET /api/notifications, newest first. Refetch target for the
/// `notification-list` cache key.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<Notification>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let notifications = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, kind, body, conversation_id, read, created_at FROM notifications
                 WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 100",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let notifications: Vec<Notification> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    kind: parse_kind(&row.get::<_, String>(1)?),
                    body: row.get(2)?,
                    conversation_id: row.get(3)?,
                    read: row.get::<_, i64>(4)? != 0,
                    created_at: parse_ts(&row.get::<_, String>(5)?),
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(notifications)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(notifications))
}
