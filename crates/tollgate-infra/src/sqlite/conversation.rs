//! SQLite conversation repository.
//!
//! Implements `ConversationRepository` from `tollgate-core` using sqlx
//! with the split read/write pool: raw queries, private Row structs for
//! SQLite-to-domain mapping.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use tollgate_core::conversation::ConversationRepository;
use tollgate_types::conversation::{Conversation, StoredMessage};
use tollgate_types::error::RepositoryError;
use tollgate_types::llm::MessageRole;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    session_id: String,
    user_id: Option<String>,
    started_at: String,
    last_activity: String,
    total_cost: f64,
    message_count: i64,
    active: i64,
    default_provider: Option<String>,
    default_model: Option<String>,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            started_at: row.try_get("started_at")?,
            last_activity: row.try_get("last_activity")?,
            total_cost: row.try_get("total_cost")?,
            message_count: row.try_get("message_count")?,
            active: row.try_get("active")?,
            default_provider: row.try_get("default_provider")?,
            default_model: row.try_get("default_model")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation id: {e}")))?;
        Ok(Conversation {
            id,
            session_id: self.session_id,
            user_id: self.user_id,
            started_at: parse_datetime(&self.started_at)?,
            last_activity: parse_datetime(&self.last_activity)?,
            total_cost: self.total_cost,
            message_count: self.message_count as u32,
            active: self.active != 0,
            default_provider: self.default_provider,
            default_model: self.default_model,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    created_at: String,
    request_id: Option<String>,
    tokens_used: i64,
    cost: f64,
    provider: Option<String>,
    model: Option<String>,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            request_id: row.try_get("request_id")?,
            tokens_used: row.try_get("tokens_used")?,
            cost: row.try_get("cost")?,
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
        })
    }

    fn into_message(self) -> Result<StoredMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let request_id = self
            .request_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid request_id: {e}")))?;

        Ok(StoredMessage {
            id,
            conversation_id,
            role,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
            request_id,
            tokens_used: self.tokens_used as u32,
            cost: self.cost,
            provider: self.provider,
            model: self.model,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversations (id, session_id, user_id, started_at, last_activity, total_cost, message_count, active, default_provider, default_model)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.session_id)
        .bind(&conversation.user_id)
        .bind(format_datetime(&conversation.started_at))
        .bind(format_datetime(&conversation.last_activity))
        .bind(conversation.total_cost)
        .bind(conversation.message_count as i64)
        .bind(conversation.active as i64)
        .bind(&conversation.default_provider)
        .bind(&conversation.default_model)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!(
                    "conversation {} already exists",
                    conversation.id
                ))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn find_active_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT * FROM conversations
               WHERE session_id = ? AND active = 1
               ORDER BY started_at DESC LIMIT 1"#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let conversation_row = ConversationRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(conversation_row.into_conversation()?))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE conversations
               SET last_activity = ?, total_cost = ?, message_count = ?, active = ?,
                   default_provider = ?, default_model = ?
               WHERE id = ?"#,
        )
        .bind(format_datetime(&conversation.last_activity))
        .bind(conversation.total_cost)
        .bind(conversation.message_count as i64)
        .bind(conversation.active as i64)
        .bind(&conversation.default_provider)
        .bind(&conversation.default_model)
        .bind(conversation.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn append_message(&self, message: &StoredMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversation_messages (id, conversation_id, role, content, created_at, request_id, tokens_used, cost, provider, model)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(format_datetime(&message.created_at))
        .bind(message.request_id.map(|id| id.to_string()))
        .bind(message.tokens_used as i64)
        .bind(message.cost)
        .bind(&message.provider)
        .bind(&message.model)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                RepositoryError::NotFound
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn messages(
        &self,
        conversation_id: &Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        // Tail-limited but chronological: select the newest N descending,
        // then reverse.
        let mut sql = String::from(
            "SELECT * FROM conversation_messages WHERE conversation_id = ? ORDER BY created_at DESC, id DESC",
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&sql)
            .bind(conversation_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message_row =
                MessageRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            messages.push(message_row.into_message()?);
        }
        messages.reverse();
        Ok(messages)
    }

    async fn archive_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET active = 0 WHERE active = 1 AND last_activity < ?",
        )
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
