//! ConversationRepository trait definition.
//!
//! CRUD operations for conversations and their ordered message log.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tollgate_types::conversation::{Conversation, StoredMessage};
use tollgate_types::error::RepositoryError;

/// Repository trait for conversation and message persistence.
///
/// Implementations live in tollgate-infra (e.g. `SqliteConversationRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationRepository: Send + Sync {
    /// Create a new conversation record.
    fn create(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Look up the active conversation for a caller-supplied session id.
    fn find_active_by_session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Update conversation totals, activity timestamp, or active flag.
    fn update(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Append one message to a conversation's log.
    fn append_message(
        &self,
        message: &StoredMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get messages for a conversation, ordered by created_at ASC.
    ///
    /// `limit` keeps only the most recent N messages (still in
    /// chronological order).
    fn messages(
        &self,
        conversation_id: &Uuid,
        limit: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<StoredMessage>, RepositoryError>> + Send;

    /// Mark conversations inactive whose last activity is older than
    /// `cutoff`. Returns the number archived.
    fn archive_idle(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
