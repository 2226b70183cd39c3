//! Knowledge retrieval for the current input.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::RetrievalClient;
use crate::node::{Node, NodeContext, NodeError, SideEffect};
use crate::retry::RetryPolicy;
use crate::state::{ConversationState, StateDelta};

/// Queries the retrieval collaborator and replaces the turn's context
/// window. An empty result is a normal outcome, never an error.
pub struct RetrieveKnowledge {
    retrieval: Arc<dyn RetrievalClient>,
    retry: RetryPolicy,
    k: usize,
}

impl RetrieveKnowledge {
    #[must_use]
    pub fn new(retrieval: Arc<dyn RetrievalClient>, retry: RetryPolicy, k: usize) -> Self {
        Self { retrieval, retry, k }
    }
}

#[async_trait]
impl Node for RetrieveKnowledge {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let passages = self
            .retry
            .run(|| self.retrieval.search(&state.current_input, self.k))
            .await?;
        tracing::debug!(count = passages.len(), "knowledge retrieved");
        let mut delta = StateDelta::new();
        delta.retrieved = Some(passages);
        Ok(delta)
    }
}
