//! In-memory `ConversationRepository` for tests and ephemeral deployments.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tollgate_types::conversation::{Conversation, StoredMessage};
use tollgate_types::error::RepositoryError;

use super::repository::ConversationRepository;

#[derive(Default)]
struct Store {
    conversations: Vec<Conversation>,
    messages: Vec<StoredMessage>,
}

/// Non-persistent repository backed by a mutex-guarded Vec pair.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    store: Mutex<Store>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if store.conversations.iter().any(|c| c.id == conversation.id) {
            return Err(RepositoryError::Conflict(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        store.conversations.push(conversation.clone());
        Ok(())
    }

    async fn find_active_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Ok(store
            .conversations
            .iter()
            .filter(|c| c.session_id == session_id && c.active)
            .max_by_key(|c| c.started_at)
            .cloned())
    }

    async fn update(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        match store
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => {
                *existing = conversation.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn append_message(&self, message: &StoredMessage) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if !store
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id)
        {
            return Err(RepositoryError::NotFound);
        }
        store.messages.push(message.clone());
        Ok(())
    }

    async fn messages(
        &self,
        conversation_id: &Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages: Vec<StoredMessage> = store
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            let keep = limit.max(0) as usize;
            if messages.len() > keep {
                messages.drain(..messages.len() - keep);
            }
        }
        Ok(messages)
    }

    async fn archive_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let mut archived = 0;
        for conversation in store
            .conversations
            .iter_mut()
            .filter(|c| c.active && c.last_activity < cutoff)
        {
            conversation.active = false;
            archived += 1;
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_find_active() {
        let repo = InMemoryConversationRepository::new();
        let conv = Conversation::new("s-1", None);
        repo.create(&conv).await.unwrap();

        let found = repo.find_active_by_session("s-1").await.unwrap().unwrap();
        assert_eq!(found.id, conv.id);
        assert!(repo.find_active_by_session("s-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let repo = InMemoryConversationRepository::new();
        let conv = Conversation::new("s-1", None);
        repo.create(&conv).await.unwrap();
        assert!(matches!(
            repo.create(&conv).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_messages_ordered_and_limited() {
        let repo = InMemoryConversationRepository::new();
        let conv = Conversation::new("s-1", None);
        repo.create(&conv).await.unwrap();

        for i in 0..5 {
            repo.append_message(&StoredMessage::user(conv.id, format!("m{i}")))
                .await
                .unwrap();
        }

        let all = repo.messages(&conv.id, None).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "m0");
        assert_eq!(all[4].content, "m4");

        // Limit keeps the most recent messages in chronological order.
        let tail = repo.messages(&conv.id, Some(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m3");
        assert_eq!(tail[1].content, "m4");
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation_fails() {
        let repo = InMemoryConversationRepository::new();
        let orphan = StoredMessage::user(Uuid::now_v7(), "hi");
        assert!(matches!(
            repo.append_message(&orphan).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_archive_idle_flips_active_flag() {
        let repo = InMemoryConversationRepository::new();
        let mut stale = Conversation::new("old", None);
        stale.last_activity = Utc::now() - chrono::Duration::hours(48);
        let fresh = Conversation::new("new", None);
        repo.create(&stale).await.unwrap();
        repo.create(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        assert_eq!(repo.archive_idle(cutoff).await.unwrap(), 1);
        assert!(repo.find_active_by_session("old").await.unwrap().is_none());
        assert!(repo.find_active_by_session("new").await.unwrap().is_some());
    }
}
