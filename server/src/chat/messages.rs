//! Message history, the send-message mutation, and read markers.
//!
//! Sending is where the durable-write / realtime-delivery isolation boundary
//! lives: the message is committed first, and only then fanned out through
//! the dispatcher. A delivery failure (or an entirely offline recipient) can
//! never fail the REST call.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use gather_wire::{ChatMessage, Notification, NotificationKind, PushPayload};

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn is_member(
    conn: &rusqlite::Connection,
    conversation_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
        rusqlite::params![conversation_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// GET /api/conversations/{id}/messages: full message history, oldest
/// first. Refetch target for the `conversation-messages[id]` cache key.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !is_member(&conn, &conversation_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }

        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, sender_id, body, sent_at FROM messages
                 WHERE conversation_id = ?1 ORDER BY sent_at ASC, id ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let messages: Vec<ChatMessage> = stmt
            .query_map(rusqlite::params![conversation_id], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    body: row.get(3)?,
                    sent_at: parse_ts(&row.get::<_, String>(4)?),
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(messages)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(messages))
}

/// POST /api/conversations/{id}/messages: durable write, then best-effort
/// fan-out. Each member's sockets get a `new_message`; everyone except the
/// sender also gets a durable notification row plus a `new_notification`
/// push.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<ChatMessage>, StatusCode> {
    if body.body.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let sender_id = claims.sub.clone();
    let sender_handle = claims.handle.clone();
    let cid = conversation_id.clone();
    let text = body.body.clone();

    // Durable write: the message row, plus one notification row per
    // recipient. Collect what the fan-out needs while the lock is held.
    let (message, recipients) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !is_member(&conn, &cid, &sender_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }

        let now = Utc::now();
        let message = ChatMessage {
            id: Uuid::now_v7().to_string(),
            conversation_id: cid.clone(),
            sender_id: sender_id.clone(),
            body: text,
            sent_at: now,
        };
        conn.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, body, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                message.id,
                message.conversation_id,
                message.sender_id,
                message.body,
                now.to_rfc3339()
            ],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare("SELECT user_id FROM conversation_members WHERE conversation_id = ?1")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let member_ids: Vec<String> = stmt
            .query_map(rusqlite::params![cid], |row| row.get(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut recipients = Vec::new();
        for member_id in member_ids {
            let notification = if member_id != sender_id {
                let notification = Notification {
                    id: Uuid::now_v7().to_string(),
                    kind: NotificationKind::ChatMessage,
                    body: format!("New message from {}", sender_handle),
                    conversation_id: Some(cid.clone()),
                    read: false,
                    created_at: now,
                };
                conn.execute(
                    "INSERT INTO notifications (id, user_id, kind, body, conversation_id, read, created_at)
                     VALUES (?1, ?2, 'chat_message', ?3, ?4, 0, ?5)",
                    rusqlite::params![
                        notification.id,
                        member_id,
                        notification.body,
                        cid,
                        now.to_rfc3339()
                    ],
                )
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                Some(notification)
            } else {
                None
            };
            recipients.push((member_id, notification));
        }

        Ok::<_, StatusCode>((message, recipients))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    // Best-effort fan-out. Offline members miss the push and reconcile via
    // REST refetch; nothing here can fail the request.
    for (member_id, notification) in recipients {
        state.dispatcher.dispatch(
            &member_id,
            &PushPayload::NewMessage {
                message: message.clone(),
                conversation_id: Some(conversation_id.clone()),
            },
        );
        if let Some(notification) = notification {
            state
                .dispatcher
                .dispatch(&member_id, &PushPayload::NewNotification { notification });
        }
    }

    Ok(Json(message))
}

/// POST /api/conversations/{id}/read, the REST twin of the `mark_read` frame.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    mark_conversation_read(&state, &claims.sub, &conversation_id).await?;
    Ok(StatusCode::OK)
}

/// Advance the caller's read marker and settle the related notifications,
/// then tell every one of the caller's connections so other tabs drop their
/// stale unread state. Shared by the REST endpoint and the WS frame handler.
pub async fn mark_conversation_read(
    state: &AppState,
    user_id: &str,
    conversation_id: &str,
) -> Result<(), StatusCode> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let cid = conversation_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !is_member(&conn, &cid, &uid).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? {
            return Err(StatusCode::FORBIDDEN);
        }

        conn.execute(
            "UPDATE conversation_members SET last_read_at = ?1
             WHERE conversation_id = ?2 AND user_id = ?3",
            rusqlite::params![Utc::now().to_rfc3339(), cid, uid],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.execute(
            "UPDATE notifications SET read = 1
             WHERE user_id = ?1 AND conversation_id = ?2 AND read = 0",
            rusqlite::params![uid, cid],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state.dispatcher.dispatch(
        user_id,
        &PushPayload::MessagesMarkedRead {
            conversation_id: conversation_id.to_string(),
        },
    );

    Ok(())
}
