//! Conversation creation and the conversation-list refetch target.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gather_wire::ChatMessage;

use crate::auth::middleware::Claims;
use crate::db::models::ConversationSummary;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Handles of the other participants. The caller is always a member.
    pub member_handles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub id: String,
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// POST /api/conversations: create a conversation between the caller and
/// the listed handles. Every handle must already exist.
pub async fn create_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<CreateConversationResponse>, StatusCode> {
    if body.member_handles.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let caller_id = claims.sub.clone();

    let conversation_id = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Resolve every handle up front so a typo fails the whole request
        let mut member_ids = vec![caller_id.clone()];
        for handle in &body.member_handles {
            let user_id: String = conn
                .query_row(
                    "SELECT id FROM users WHERE handle = ?1",
                    rusqlite::params![handle],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                })?;
            if !member_ids.contains(&user_id) {
                member_ids.push(user_id);
            }
        }

        let conversation_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversations (id, created_at) VALUES (?1, ?2)",
            rusqlite::params![conversation_id, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        for user_id in &member_ids {
            conn.execute(
                "INSERT INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![conversation_id, user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        Ok::<_, StatusCode>(conversation_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(conversation_id = %conversation_id, "Conversation created");

    Ok(Json(CreateConversationResponse {
        id: conversation_id,
    }))
}

/// GET /api/conversations: the caller's conversations with unread counts
/// and last-message previews. This is the refetch target the client hits
/// whenever the `conversation-list` cache key is invalidated.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let summaries = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT cm.conversation_id, cm.last_read_at
                 FROM conversation_members cm
                 JOIN conversations c ON c.id = cm.conversation_id
                 WHERE cm.user_id = ?1
                 ORDER BY c.created_at DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let memberships: Vec<(String, Option<String>)> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut summaries = Vec::with_capacity(memberships.len());
        for (conversation_id, last_read_at) in memberships {
            let member_handles: Vec<String> = conn
                .prepare(
                    "SELECT u.handle FROM conversation_members cm
                     JOIN users u ON u.id = cm.user_id
                     WHERE cm.conversation_id = ?1
                     ORDER BY u.handle",
                )
                .and_then(|mut s| {
                    s.query_map(rusqlite::params![conversation_id], |row| row.get(0))
                        .map(|rows| rows.filter_map(|r| r.ok()).collect())
                })
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

            // Unread: messages from other members newer than my read marker
            let floor = last_read_at.unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string());
            let unread_count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE conversation_id = ?1 AND sender_id != ?2 AND sent_at > ?3",
                    rusqlite::params![conversation_id, user_id, floor],
                    |row| row.get(0),
                )
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

            let last_message = conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, body, sent_at FROM messages
                     WHERE conversation_id = ?1 ORDER BY sent_at DESC, id DESC LIMIT 1",
                    rusqlite::params![conversation_id],
                    |row| {
                        Ok(ChatMessage {
                            id: row.get(0)?,
                            conversation_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            body: row.get(3)?,
                            sent_at: parse_ts(&row.get::<_, String>(4)?),
                        })
                    },
                )
                .ok();

            summaries.push(ConversationSummary {
                id: conversation_id,
                member_handles,
                unread_count,
                last_message,
            });
        }

        Ok::<_, StatusCode>(summaries)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(summaries))
}
