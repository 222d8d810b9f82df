//! Conversation service orchestrating session lifecycle and message
//! persistence.
//!
//! The service owns the per-session ordering invariant: every exchange
//! for a session runs under that session's async lock, so messages land
//! in the log in the order the exchanges completed, with no interleaving
//! between concurrent requests for the same session.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use tollgate_types::config::ConversationConfig;
use tollgate_types::conversation::{Conversation, MessageRole, StoredMessage};
use tollgate_types::error::{GatewayError, RepositoryError};
use tollgate_types::llm::GenerationResult;
use uuid::Uuid;

use crate::estimate::estimate_tokens;

use super::repository::ConversationRepository;

/// Coordinates conversation state on top of a `ConversationRepository`.
///
/// Generic over the repository so tollgate-core never depends on
/// tollgate-infra.
pub struct ConversationService<R: ConversationRepository> {
    repo: Arc<R>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: ConversationConfig,
}

impl<R: ConversationRepository> ConversationService<R> {
    pub fn new(repo: Arc<R>, config: ConversationConfig) -> Self {
        Self {
            repo,
            locks: DashMap::new(),
            config,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.config.system_prompt.as_deref()
    }

    /// Acquire the session's exchange lock. Held across resolve, generate
    /// and record so messages within a session never interleave.
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the session's lock entry once no exchange holds or awaits it.
    ///
    /// `lock_session` clones the Arc while holding the map shard, so a
    /// strong count of 1 proves the map holds the only reference and the
    /// entry can go without racing a concurrent acquire.
    pub fn release_session(&self, session_id: &str) {
        self.locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Fetch the session's active conversation, or start one.
    ///
    /// Archival is lazy: an active conversation whose last activity is
    /// older than the configured idle window is closed here, and a fresh
    /// conversation takes its place.
    pub async fn ensure_conversation(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Conversation, RepositoryError> {
        if let Some(mut existing) = self.repo.find_active_by_session(session_id).await? {
            let idle_cutoff =
                Utc::now() - Duration::seconds(self.config.archive_after_secs as i64);
            if existing.last_activity >= idle_cutoff {
                return Ok(existing);
            }
            existing.active = false;
            self.repo.update(&existing).await?;
            info!(
                session_id = %session_id,
                conversation_id = %existing.id,
                "Archived idle conversation"
            );
        }

        let conversation = Conversation::new(session_id, user_id.map(str::to_string));
        self.repo.create(&conversation).await?;
        debug!(
            session_id = %session_id,
            conversation_id = %conversation.id,
            "Started conversation"
        );
        Ok(conversation)
    }

    /// Select the most recent messages that fit the history token budget.
    ///
    /// Walks the log backwards accumulating estimated tokens and returns
    /// the kept suffix in chronological order. At least the latest
    /// message is kept even when it alone exceeds the budget.
    pub async fn context_messages(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let all = self.repo.messages(&conversation.id, None).await?;
        let budget = self.config.history_token_budget;
        let mut kept = 0usize;
        let mut spent = 0u32;
        for message in all.iter().rev() {
            let tokens = estimate_tokens(&message.content);
            if kept > 0 && spent.saturating_add(tokens) > budget {
                break;
            }
            spent = spent.saturating_add(tokens);
            kept += 1;
        }
        Ok(all[all.len() - kept..].to_vec())
    }

    /// Persist one completed exchange: the user prompt followed by the
    /// assistant reply with its request linkage, tokens, and cost.
    /// Returns the ids of the appended user and assistant messages.
    pub async fn record_exchange(
        &self,
        conversation: &mut Conversation,
        user_prompt: &str,
        result: &GenerationResult,
    ) -> Result<(Uuid, Uuid), RepositoryError> {
        let user_message = StoredMessage::user(conversation.id, user_prompt);
        self.repo.append_message(&user_message).await?;
        let assistant_message = StoredMessage {
            id: Uuid::now_v7(),
            conversation_id: conversation.id,
            role: MessageRole::Assistant,
            content: result.content.clone(),
            created_at: Utc::now(),
            request_id: Some(result.request_id),
            tokens_used: result.tokens_used,
            cost: result.cost,
            provider: Some(result.provider.clone()),
            model: Some(result.model.clone()),
        };
        self.repo.append_message(&assistant_message).await?;

        conversation.message_count += 2;
        conversation.total_cost += result.cost;
        conversation.last_activity = Utc::now();
        conversation.default_provider = Some(result.provider.clone());
        conversation.default_model = Some(result.model.clone());
        self.repo.update(conversation).await?;
        Ok((user_message.id, assistant_message.id))
    }

    /// Persist a failed exchange. The assistant turn records the error
    /// text with zero tokens and zero cost, so the transcript shows what
    /// the caller saw.
    pub async fn record_failure(
        &self,
        conversation: &mut Conversation,
        user_prompt: &str,
        error_text: &str,
    ) -> Result<(), RepositoryError> {
        self.repo
            .append_message(&StoredMessage::user(conversation.id, user_prompt))
            .await?;
        self.repo
            .append_message(&StoredMessage {
                id: Uuid::now_v7(),
                conversation_id: conversation.id,
                role: MessageRole::Assistant,
                content: error_text.to_string(),
                created_at: Utc::now(),
                request_id: None,
                tokens_used: 0,
                cost: 0.0,
                provider: None,
                model: None,
            })
            .await?;

        conversation.message_count += 2;
        conversation.last_activity = Utc::now();
        self.repo.update(conversation).await
    }

    /// Full (or tail-limited) history for a session's active conversation.
    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<i64>,
    ) -> Result<(Conversation, Vec<StoredMessage>), GatewayError> {
        let conversation = self
            .repo
            .find_active_by_session(session_id)
            .await?
            .ok_or_else(|| {
                GatewayError::NotFound(format!("no active conversation for session '{session_id}'"))
            })?;
        let messages = self.repo.messages(&conversation.id, limit).await?;
        Ok((conversation, messages))
    }
}

/// Render context messages and the current prompt into a single prompt
/// body for providers without a native message API.
pub fn render_transcript(context: &[StoredMessage], user_prompt: &str) -> String {
    if context.is_empty() {
        return user_prompt.to_string();
    }
    let mut out = String::new();
    for message in context {
        out.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    out.push_str(&format!("user: {user_prompt}"));
    out
}
