use serde::Serialize;

/// One entry in GET /api/conversations: a conversation plus the data the
/// client's conversation-list view needs without extra round trips.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub member_handles: Vec<String>,
    pub unread_count: i64,
    pub last_message: Option<gather_wire::ChatMessage>,
}
