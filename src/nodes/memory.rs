//! Long-term memory stages: loading, condensing, and persisting the user's
//! conversation summary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::ModelClient;
use crate::node::{Node, NodeContext, NodeError, SideEffect};
use crate::retry::RetryPolicy;
use crate::state::{ConversationState, StateDelta};
use crate::storage::Storage;

/// Loads the most recent long-term memory entry for the user, regardless
/// of which channel produced it.
pub struct LoadUserContext {
    storage: Arc<dyn Storage>,
}

impl LoadUserContext {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Node for LoadUserContext {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let entry = self.storage.load_user_context(&state.user_identifier).await?;
        let mut delta = StateDelta::new();
        delta.user_context = entry.map(|e| e.summary);
        Ok(delta)
    }
}

/// Folds this turn into the user's memory profile via the model.
pub struct SummarizeConversation {
    model: Arc<dyn ModelClient>,
    retry: RetryPolicy,
}

impl SummarizeConversation {
    #[must_use]
    pub fn new(model: Arc<dyn ModelClient>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    fn build_prompt(state: &ConversationState) -> String {
        let existing = state
            .user_context
            .as_deref()
            .unwrap_or("No previous context.");
        format!(
            "You maintain a user's memory profile.\n\
             Current memory: {existing}\n\n\
             New interaction:\n\
             User: {}\n\
             Assistant: {}\n\n\
             Merge the new facts into the memory. Be concise. Return only the \
             updated summary text.\n",
            state.current_input,
            state.reply.as_deref().unwrap_or_default()
        )
    }
}

#[async_trait]
impl Node for SummarizeConversation {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let prompt = Self::build_prompt(state);
        let summary = self.retry.run(|| self.model.generate(&prompt)).await?;
        if summary.trim().is_empty() {
            tracing::warn!("summarizer returned empty output");
        }
        let mut delta = StateDelta::new();
        delta.summary = Some(summary);
        Ok(delta)
    }
}

/// Upserts the condensed memory entry for the user.
pub struct SaveUserContext {
    storage: Arc<dyn Storage>,
}

impl SaveUserContext {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Node for SaveUserContext {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalWrite
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let summary = state.summary.as_deref().unwrap_or_default();
        if summary.trim().is_empty() {
            tracing::warn!("no summary to persist; skipping");
            return Ok(StateDelta::new());
        }
        self.storage
            .save_user_context(&state.user_identifier, &state.channel, summary)
            .await?;
        tracing::debug!(user = %state.user_identifier, "long-term memory updated");
        Ok(StateDelta::new())
    }
}
