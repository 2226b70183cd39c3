//! Checkpoint primitives for resumable execution.
//!
//! A [`Checkpoint`] is the durable snapshot taken immediately before a node
//! executes (and again at suspension and termination). The contract is
//! latest-wins per conversation: `save` replaces the previous checkpoint,
//! `load_latest` returns `Ok(None)` when a conversation has never run.
//! Suspension survives process restarts precisely because the SUSPENDED
//! state is just another checkpoint.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeId;
use crate::state::ConversationState;

/// A durable snapshot of run state at a node boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub conversation_id: String,
    /// One-based step number within the run that captured this snapshot.
    pub step: u32,
    /// The node the snapshot was captured at (about to execute, or the
    /// last node for terminal snapshots).
    pub node: NodeId,
    /// Suspension generation; grows across the conversation's lifetime.
    pub generation: u64,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn capture(state: &ConversationState, step: u32, node: NodeId) -> Self {
        Self {
            conversation_id: state.conversation_id.clone(),
            step,
            node,
            generation: state.generation,
            state: state.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Errors from checkpointer operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("checkpoint backend unavailable: {0}")]
    #[diagnostic(code(chatloom::checkpoint::backend))]
    Backend(String),

    #[error("stored checkpoint could not be decoded: {0}")]
    #[diagnostic(
        code(chatloom::checkpoint::decode),
        help("The persisted JSON does not match the current state schema.")
    )]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Trait for saving and loading checkpoints.
///
/// Contract:
/// * `save` replaces the latest checkpoint for the conversation
///   (idempotent on identical input);
/// * `load_latest` returns `Ok(None)` when no checkpoint exists;
/// * `list_conversations` enumerates every conversation the backend knows.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    async fn load_latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>>;

    async fn list_conversations(&self) -> Result<Vec<String>>;
}

/// Volatile checkpointer storing only the latest checkpoint per
/// conversation. Suitable for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: RwLock<FxHashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|e| CheckpointerError::Backend(format!("lock poisoned: {e}")))?;
        map.insert(checkpoint.conversation_id.clone(), checkpoint);
        Ok(())
    }

    async fn load_latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>> {
        let map = self
            .inner
            .read()
            .map_err(|e| CheckpointerError::Backend(format!("lock poisoned: {e}")))?;
        Ok(map.get(conversation_id).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<String>> {
        let map = self
            .inner
            .read()
            .map_err(|e| CheckpointerError::Backend(format!("lock poisoned: {e}")))?;
        Ok(map.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Channel, RunStatus};

    fn state() -> ConversationState {
        ConversationState::new_turn("c1", Channel::WhatsApp, "u1", "hi")
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = InMemoryCheckpointer::new();
        let cp = Checkpoint::capture(&state(), 3, NodeId::ClassifyMessage);
        store.save(cp.clone()).await.unwrap();

        let loaded = store.load_latest("c1").await.unwrap().unwrap();
        assert_eq!(loaded.step, 3);
        assert_eq!(loaded.node, NodeId::ClassifyMessage);
        assert_eq!(loaded.state.run_status, RunStatus::Running);
    }

    #[tokio::test]
    async fn latest_wins() {
        let store = InMemoryCheckpointer::new();
        store
            .save(Checkpoint::capture(&state(), 1, NodeId::ManageHistory))
            .await
            .unwrap();
        store
            .save(Checkpoint::capture(&state(), 2, NodeId::CheckUserProfile))
            .await
            .unwrap();
        let loaded = store.load_latest("c1").await.unwrap().unwrap();
        assert_eq!(loaded.step, 2);
    }

    #[tokio::test]
    async fn missing_conversation_is_none() {
        let store = InMemoryCheckpointer::new();
        assert!(store.load_latest("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_conversations_enumerates_keys() {
        let store = InMemoryCheckpointer::new();
        let mut a = state();
        a.conversation_id = "alpha".to_string();
        let mut b = state();
        b.conversation_id = "beta".to_string();
        store
            .save(Checkpoint::capture(&a, 1, NodeId::ManageHistory))
            .await
            .unwrap();
        store
            .save(Checkpoint::capture(&b, 1, NodeId::ManageHistory))
            .await
            .unwrap();
        let mut ids = store.list_conversations().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
