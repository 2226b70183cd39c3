//! Response generation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::ModelClient;
use crate::fewshot::ExampleBank;
use crate::node::{Node, NodeContext, NodeError, SideEffect};
use crate::retry::RetryPolicy;
use crate::state::{Channel, ConversationState, StateDelta};

/// Composes the model prompt from history, retrieved knowledge,
/// intent-filtered few-shot examples, profile, and channel style, and
/// produces the draft reply. Never mutates intent or profile.
///
/// On a first-contact turn without a known name the node short-circuits to
/// a channel-appropriate name request before answering anything else.
pub struct GenerateResponse {
    model: Arc<dyn ModelClient>,
    examples: Arc<ExampleBank>,
    retry: RetryPolicy,
    example_count: usize,
}

impl GenerateResponse {
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

    fn name_request(channel: &Channel) -> &'static str {
        match channel {
            Channel::WhatsApp => {
                "Hi there! Before we start, what's your name? It helps me assist you better."
            }
            Channel::Email => {
                "Hello, and welcome. So that I can assist you personally, could you let me know \
                 your name, please?"
            }
            Channel::Telegram => "Hi! What's your name? I can help you better once I know it.",
            Channel::Web | Channel::Other(_) => {
                "Hello! Before we continue, could you tell me your name so I can personalize \
                 your support?"
            }
        }
    }

    fn build_prompt(
        &self,
        state: &ConversationState,
        examples: &[crate::fewshot::FewShotExample],
    ) -> String {
        let intent = state
            .intent
            .map(|i| i.as_str())
            .unwrap_or("GENERAL");
        let mut prompt = format!(
            "You are a helpful assistant responding via {}. \
             The user's intent is classified as {}. {}\n",
            state.channel,
            intent,
            state.channel.style_hint()
        );

        if !state.retrieved_context.is_empty() {
            prompt.push_str("\nKnowledge base passages (answer from these when relevant; quote \
                             prices, hours, and specifications exactly; never invent company \
                             facts):\n");
            for passage in &state.retrieved_context {
                prompt.push_str(&format!("- {}\n", passage.text));
            }
        }

        if let Some(name) = state
            .user_profile
            .as_ref()
            .and_then(|p| p.name.as_deref())
        {
            prompt.push_str(&format!(
                "\nThe user's name is {name}. Use it naturally in the reply.\n"
            ));
        }

        if let Some(context) = state.user_context.as_deref() {
            prompt.push_str(&format!(
                "\nWhat is known from previous conversations: {context}\n"
            ));
        }

        if !examples.is_empty() {
            prompt.push_str(&format!(
                "\nExamples of high-quality {intent} responses:\n"
            ));
            for example in examples {
                prompt.push_str(&format!("Q: {}\nA: {}\n", example.input, example.output));
            }
        }

        prompt.push_str("\nConversation so far:\n");
        for message in &state.messages {
            prompt.push_str(&format!("{}: {}\n", message.role, message.content));
        }
        prompt.push_str("\nWrite the assistant's next reply.\n");
        prompt
    }
}

#[async_trait]
impl Node for GenerateResponse {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let known_name = state
            .user_profile
            .as_ref()
            .is_some_and(|p| p.has_name());
        if state.first_contact && !known_name {
            tracing::debug!("first contact without a name; asking for one");
            return Ok(StateDelta::new().with_reply(Self::name_request(&state.channel)));
        }

        let examples = self
            .examples
            .select(state.intent, &state.current_input, self.example_count);
        let prompt = self.build_prompt(state, &examples);
        let reply = self.retry.run(|| self.model.generate(&prompt)).await?;
        tracing::debug!(chars = reply.len(), "reply generated");

        let mut delta = StateDelta::new().with_reply(reply);
        delta.examples = Some(examples);
        Ok(delta)
    }
}
