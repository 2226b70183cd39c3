//! Intent classification.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::ModelClient;
use crate::fewshot::ExampleBank;
use crate::node::{Node, NodeContext, NodeError, SideEffect};
use crate::retry::RetryPolicy;
use crate::state::{ConversationState, Intent, StateDelta};

/// Assigns the turn's intent using few-shot classification context.
///
/// Fails closed: any output the model produces maps to one of the four
/// intents (GENERAL when nothing is recognizable), so intent is never left
/// unset. A collaborator outage that outlasts the retry policy is a node
/// failure, not a silent GENERAL.
pub struct ClassifyMessage {
    model: Arc<dyn ModelClient>,
    examples: Arc<ExampleBank>,
    retry: RetryPolicy,
    example_count: usize,
}

impl ClassifyMessage {
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelClient>,
        examples: Arc<ExampleBank>,
        retry: RetryPolicy,
        example_count: usize,
    ) -> Self {
        Self {
            model,
            examples,
            retry,
            example_count,
        }
    }

    fn build_prompt(&self, state: &ConversationState) -> String {
        let mut prompt = String::from("You are an intent classifier for a support agent.\n");

        let examples = self
            .examples
            .select(None, &state.current_input, self.example_count);
        if !examples.is_empty() {
            prompt.push_str("\nExamples of correct classifications:\n");
            for example in &examples {
                prompt.push_str(&format!("User: {}\nIntent: {}\n", example.input, example.output));
            }
        }

        prompt.push_str("\nConversation so far:\n");
        for message in &state.messages {
            prompt.push_str(&format!("{}: {}\n", message.role, message.content));
        }

        prompt.push_str(
            "\nClassify the user's latest intent into one of: \
             SALES, SUPPORT, COMPLAINT, GENERAL. Reply with the category name only.\n",
        );
        prompt
    }
}

#[async_trait]
impl Node for ClassifyMessage {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let prompt = self.build_prompt(state);
        let raw = self.retry.run(|| self.model.generate(&prompt)).await?;
        let intent = Intent::from_model_output(&raw);
        tracing::debug!(raw = %raw.trim(), %intent, "message classified");
        Ok(StateDelta::new().with_intent(intent))
    }
}
