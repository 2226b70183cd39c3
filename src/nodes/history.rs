//! History management: loading the conversation window and persisting the
//! turn's messages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, SideEffect};
use crate::state::{ConversationState, StateDelta};
use crate::storage::Storage;

/// Finds or creates the conversation record, persists the inbound user
/// message, and loads the recent history window into the state.
///
/// The inbound message id derives from the turn id, so a retried execution
/// appends exactly once.
pub struct ManageHistory {
    storage: Arc<dyn Storage>,
    history_window: usize,
}

impl ManageHistory {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, history_window: usize) -> Self {
        Self {
            storage,
            history_window,
        }
    }
}

#[async_trait]
impl Node for ManageHistory {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalWrite
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let conversation = self
            .storage
            .find_or_create_conversation(&state.channel, &state.user_identifier)
            .await?;

        let inbound = Message::with_id(
            format!("{}:user", state.turn_id),
            Message::USER,
            &state.current_input,
        );
        let inserted = self.storage.append_message(&conversation.id, &inbound).await?;
        tracing::debug!(
            conversation = %conversation.id,
            inserted,
            "inbound message persisted"
        );

        let history = self
            .storage
            .recent_messages(&conversation.id, self.history_window)
            .await?;

        let mut delta = StateDelta::new().with_messages(history);
        delta.conversation_id = Some(conversation.id);
        Ok(delta)
    }
}

/// Appends the final assistant reply to the conversation (idempotent by
/// message id) and computes the summarize heuristic for the router.
pub struct SaveResponse {
    storage: Arc<dyn Storage>,
    summarize_after_messages: usize,
    summarize_after_chars: usize,
}

impl SaveResponse {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        summarize_after_messages: usize,
        summarize_after_chars: usize,
    ) -> Self {
        Self {
            storage,
            summarize_after_messages,
            summarize_after_chars,
        }
    }
}

#[async_trait]
impl Node for SaveResponse {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalWrite
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let reply = state.reply.as_deref().ok_or(NodeError::MissingInput {
            what: "assistant reply",
        })?;

        let message = Message::with_id(
            format!("{}:assistant", state.turn_id),
            Message::ASSISTANT,
            reply,
        );
        let inserted = self
            .storage
            .append_message(&state.conversation_id, &message)
            .await?;
        tracing::debug!(inserted, "assistant reply persisted");

        let message_count = state.messages.len() + usize::from(inserted);
        let content_chars: usize = state
            .messages
            .iter()
            .map(|m| m.content.len())
            .sum::<usize>()
            + reply.len();
        let should_summarize = message_count >= self.summarize_after_messages
            || content_chars >= self.summarize_after_chars;

        let mut delta = StateDelta::new().with_messages(vec![message]);
        delta.should_summarize = Some(should_summarize);
        Ok(delta)
    }
}
