//! Volatile in-process storage for tests and development.

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::message::Message;
use crate::state::{Channel, PendingAction, UserProfile};

use super::{
    ActionStatus, ConversationRecord, MemoryEntry, PendingActionRecord, Storage, StorageError,
};

#[derive(Default)]
struct Inner {
    conversations: Vec<ConversationRecord>,
    messages: FxHashMap<String, Vec<Message>>,
    profiles: FxHashMap<String, UserProfile>,
    contexts: FxHashMap<String, MemoryEntry>,
    actions: Vec<PendingActionRecord>,
}

/// In-memory [`Storage`] with the same atomicity and idempotency contract
/// as a durable backend: each call takes the lock once, so a partial write
/// is never observable.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_or_create_conversation(
        &self,
        channel: &Channel,
        user_identifier: &str,
    ) -> Result<ConversationRecord, StorageError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .conversations
            .iter()
            .find(|c| &c.channel == channel && c.user_identifier == user_identifier)
        {
            return Ok(existing.clone());
        }
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            channel: channel.clone(),
            user_identifier: user_identifier.to_string(),
            created_at: Utc::now(),
        };
        inner.conversations.push(record.clone());
        Ok(record)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        let log = inner.messages.entry(conversation_id.to_string()).or_default();
        if log.iter().any(|m| m.id == message.id) {
            return Ok(false);
        }
        log.push(message.clone());
        Ok(true)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.lock()?;
        let log = inner
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }

    async fn load_profile(
        &self,
        user_identifier: &str,
    ) -> Result<Option<UserProfile>, StorageError> {
        Ok(self.lock()?.profiles.get(user_identifier).cloned())
    }

    async fn upsert_profile(
        &self,
        user_identifier: &str,
        profile: &UserProfile,
    ) -> Result<(), StorageError> {
        self.lock()?
            .profiles
            .insert(user_identifier.to_string(), profile.clone());
        Ok(())
    }

    async fn load_user_context(
        &self,
        user_identifier: &str,
    ) -> Result<Option<MemoryEntry>, StorageError> {
        Ok(self.lock()?.contexts.get(user_identifier).cloned())
    }

    async fn save_user_context(
        &self,
        user_identifier: &str,
        _channel: &Channel,
        summary: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let entry = inner
            .contexts
            .entry(user_identifier.to_string())
            .or_insert_with(|| MemoryEntry {
                summary: String::new(),
                updated_at: Utc::now(),
                conversation_count: 0,
            });
        entry.summary = summary.to_string();
        entry.updated_at = Utc::now();
        entry.conversation_count += 1;
        Ok(())
    }

    async fn record_pending_action(
        &self,
        conversation_id: &str,
        action: &PendingAction,
        generation: u64,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.actions.iter().any(|r| r.action.id == action.id) {
            return Ok(());
        }
        inner.actions.push(PendingActionRecord {
            action: action.clone(),
            conversation_id: conversation_id.to_string(),
            generation,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        });
        Ok(())
    }

    async fn latest_pending_action(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingActionRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .actions
            .iter()
            .rev()
            .find(|r| r.conversation_id == conversation_id)
            .cloned())
    }

    async fn resolve_pending_action(
        &self,
        conversation_id: &str,
        action_id: &str,
        status: ActionStatus,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        let record = inner
            .actions
            .iter_mut()
            .find(|r| r.conversation_id == conversation_id && r.action.id == action_id)
            .ok_or_else(|| StorageError::NotFound {
                what: format!("pending action {action_id}"),
            })?;
        if record.status != ActionStatus::Pending {
            return Ok(false);
        }
        record.status = status;
        record.resolved_at = Some(Utc::now());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ActionKind;

    #[tokio::test]
    async fn conversation_is_stable_per_channel_and_user() {
        let storage = InMemoryStorage::new();
        let a = storage
            .find_or_create_conversation(&Channel::WhatsApp, "u1")
            .await
            .unwrap();
        let b = storage
            .find_or_create_conversation(&Channel::WhatsApp, "u1")
            .await
            .unwrap();
        let c = storage
            .find_or_create_conversation(&Channel::Email, "u1")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn append_is_idempotent_by_id() {
        let storage = InMemoryStorage::new();
        let msg = Message::with_id("t1:user", Message::USER, "hello");
        assert!(storage.append_message("c1", &msg).await.unwrap());
        assert!(!storage.append_message("c1", &msg).await.unwrap());
        assert_eq!(storage.recent_messages("c1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recent_messages_windows_from_the_tail() {
        let storage = InMemoryStorage::new();
        for i in 0..5 {
            let msg = Message::with_id(format!("t{i}:user"), Message::USER, &format!("m{i}"));
            storage.append_message("c1", &msg).await.unwrap();
        }
        let window = storage.recent_messages("c1", 2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "m3");
        assert_eq!(window[1].content, "m4");
    }

    #[tokio::test]
    async fn pending_action_resolves_once() {
        let storage = InMemoryStorage::new();
        let action = PendingAction::new(ActionKind::Refund, "refund me", "keyword match");
        storage
            .record_pending_action("c1", &action, 1)
            .await
            .unwrap();

        assert!(storage
            .resolve_pending_action("c1", &action.id, ActionStatus::Approved)
            .await
            .unwrap());
        assert!(!storage
            .resolve_pending_action("c1", &action.id, ActionStatus::Approved)
            .await
            .unwrap());

        let record = storage.latest_pending_action("c1").await.unwrap().unwrap();
        assert_eq!(record.status, ActionStatus::Approved);
        assert!(record.resolved_at.is_some());
    }
}
