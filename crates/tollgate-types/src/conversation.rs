//! Conversation and message records.
//!
//! A conversation is the persisted, ordered message history for a
//! client-supplied session id. Messages are append-only; ordering within
//! a conversation is a hard invariant maintained by the conversation
//! service's per-session serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::llm::MessageRole;

/// A conversation grouping the exchanges of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Client-supplied session identifier.
    pub session_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Invariant: equals the sum of message costs.
    pub total_cost: f64,
    pub message_count: u32,
    pub active: bool,
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
}

impl Conversation {
    /// Start a new active conversation for a session.
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            session_id: session_id.into(),
            user_id,
            started_at: now,
            last_activity: now,
            total_cost: 0.0,
            message_count: 0,
            active: true,
            default_provider: None,
            default_model: None,
        }
    }
}

/// A single message within a conversation.
///
/// Assistant messages carry the linked request id, token usage, cost, and
/// provider/model metadata; user and system messages leave those empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub request_id: Option<Uuid>,
    pub tokens_used: u32,
    pub cost: f64,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl StoredMessage {
    /// Build a user message with no cost or token metadata.
    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            request_id: None,
            tokens_used: 0,
            cost: 0.0,
            provider: None,
            model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_is_active_and_empty() {
        let conv = Conversation::new("session-1", Some("u-1".to_string()));
        assert!(conv.active);
        assert_eq!(conv.message_count, 0);
        assert_eq!(conv.total_cost, 0.0);
        assert_eq!(conv.session_id, "session-1");
    }

    #[test]
    fn test_user_message_carries_no_cost() {
        let conv = Conversation::new("session-1", None);
        let msg = StoredMessage::user(conv.id, "hi");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.cost, 0.0);
        assert_eq!(msg.tokens_used, 0);
        assert!(msg.request_id.is_none());
    }

    #[test]
    fn test_conversation_ids_are_time_sortable() {
        let a = Conversation::new("s", None);
        let b = Conversation::new("s", None);
        // UUIDv7 sorts by creation time.
        assert!(a.id <= b.id);
    }
}
