//! Conversation state for workflow execution.
//!
//! [`ConversationState`] is the unit of work carried through the graph: one
//! instance per run, created when an inbound message arrives (or restored
//! from a checkpoint on resume). Nodes never mutate it directly; they return
//! a [`StateDelta`] which the executor merges via [`StateDelta::apply`].
//! The merge is where the structural invariants live: messages are
//! append-only (deduplicated by id), and intent is assigned exactly once
//! per turn.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;
use crate::node::NodeId;

/// Delivery channel a conversation happens over.
///
/// The channel shapes the response style (short and casual on whatsapp,
/// formal on email) and is half of the natural key that locates a
/// conversation record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    WhatsApp,
    Email,
    Telegram,
    Web,
    /// Forward-compatible escape hatch for channels this build does not
    /// know; styled with the generic hint.
    Other(String),
}

impl Channel {
    /// Parse a channel name; unknown names round-trip through [`Channel::Other`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Channel::WhatsApp,
            "email" => Channel::Email,
            "telegram" => Channel::Telegram,
            "web" => Channel::Web,
            other => Channel::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Channel::WhatsApp => "whatsapp",
            Channel::Email => "email",
            Channel::Telegram => "telegram",
            Channel::Web => "web",
            Channel::Other(name) => name.as_str(),
        }
    }

    /// Style instruction injected into the generation prompt.
    #[must_use]
    pub fn style_hint(&self) -> &'static str {
        match self {
            Channel::WhatsApp => {
                "Keep the reply under two sentences. Be casual and friendly; emojis are fine."
            }
            Channel::Email => {
                "Use formal business language with a greeting and a professional closing."
            }
            Channel::Telegram => "Be concise but informative; markdown formatting is allowed.",
            Channel::Web | Channel::Other(_) => "Be professional and helpful.",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified purpose of an inbound message.
///
/// Set exactly once per turn by the classification node; every completed
/// run carries one of these four values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Sales,
    Support,
    Complaint,
    General,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::Sales,
        Intent::Support,
        Intent::Complaint,
        Intent::General,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Sales => "SALES",
            Intent::Support => "SUPPORT",
            Intent::Complaint => "COMPLAINT",
            Intent::General => "GENERAL",
        }
    }

    /// Parse a model's classification output, failing closed to
    /// [`Intent::General`] when no known category can be recognized.
    ///
    /// ```
    /// use chatloom::state::Intent;
    ///
    /// assert_eq!(Intent::from_model_output("SUPPORT"), Intent::Support);
    /// assert_eq!(Intent::from_model_output("the intent is: sales."), Intent::Sales);
    /// assert_eq!(Intent::from_model_output("no idea"), Intent::General);
    /// ```
    #[must_use]
    pub fn from_model_output(raw: &str) -> Self {
        let upper = raw.to_ascii_uppercase();
        Intent::ALL
            .into_iter()
            .find(|intent| upper.contains(intent.as_str()))
            .unwrap_or(Intent::General)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Suspended => "SUSPENDED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known attributes of the user behind a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub preferences: FxHashMap<String, String>,
}

impl UserProfile {
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }
}

/// A retrieved knowledge passage with its relevance score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub text: String,
    pub score: f32,
}

/// Category of a sensitive action that needs human sign-off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Refund,
    AccountDeletion,
    PermissionChange,
    SensitiveInfo,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Refund => "refund",
            ActionKind::AccountDeletion => "account_deletion",
            ActionKind::PermissionChange => "permission_change",
            ActionKind::SensitiveInfo => "sensitive_info",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of a sensitive action awaiting approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique id of this request; part of the approval idempotency key.
    pub id: String,
    pub kind: ActionKind,
    /// What the action applies to (the triggering user request).
    pub target: String,
    /// Human-readable reason this was flagged, shown to the approver.
    pub justification: String,
}

impl PendingAction {
    #[must_use]
    pub fn new(kind: ActionKind, target: &str, justification: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            target: target.to_string(),
            justification: justification.to_string(),
        }
    }
}

/// The working memory of one run through the workflow graph.
///
/// Created fresh for every inbound turn; `messages`, `user_profile`, and
/// `user_context` are loaded from storage by the early nodes and persist
/// across turns under the owning conversation record. Everything else is
/// ephemeral per turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Stable identifier for the (channel, user) pair's conversation.
    pub conversation_id: String,
    pub channel: Channel,
    pub user_identifier: String,
    /// Unique id of this run; persisted writes derive idempotency keys
    /// from it.
    pub turn_id: String,
    /// The inbound text for this turn.
    pub current_input: String,
    /// Conversation history window plus this turn; append-only.
    pub messages: Vec<Message>,
    pub user_profile: Option<UserProfile>,
    /// True when no profile existed at the start of this turn.
    pub first_contact: bool,
    /// Name found in the current turn, pending a profile upsert.
    pub extracted_name: Option<String>,
    /// Long-term memory summary loaded at turn start.
    pub user_context: Option<String>,
    pub intent: Option<Intent>,
    /// Cleared and repopulated each turn.
    pub retrieved_context: Vec<ScoredPassage>,
    /// Cleared and repopulated each turn.
    pub few_shot_examples: Vec<crate::fewshot::FewShotExample>,
    /// Draft assistant reply, accumulated across nodes.
    pub reply: Option<String>,
    /// Sensitive-action match staged by detection, not yet durable.
    /// Promoted to `pending_action` by the suspension node so the
    /// pending-iff-suspended invariant holds after every node.
    pub flagged_action: Option<PendingAction>,
    /// Present iff `run_status` is [`RunStatus::Suspended`].
    pub pending_action: Option<PendingAction>,
    /// Approval decision injected by the coordinator before re-entry.
    pub action_approved: bool,
    pub run_status: RunStatus,
    /// Node to resume at; `Some` iff suspended.
    pub checkpoint_node: Option<NodeId>,
    /// Suspension generation counter, part of the approval idempotency key.
    pub generation: u64,
    /// Computed late in the run from message-count/length heuristics.
    pub should_summarize: bool,
    /// Condensed long-term memory entry produced when summarizing.
    pub summary: Option<String>,
}

impl ConversationState {
    /// Creates the state for a fresh inbound turn.
    #[must_use]
    pub fn new_turn(
        conversation_id: impl Into<String>,
        channel: Channel,
        user_identifier: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            channel,
            user_identifier: user_identifier.into(),
            turn_id: Uuid::new_v4().to_string(),
            current_input: content.into(),
            messages: Vec::new(),
            user_profile: None,
            first_contact: false,
            extracted_name: None,
            user_context: None,
            intent: None,
            retrieved_context: Vec::new(),
            few_shot_examples: Vec::new(),
            reply: None,
            flagged_action: None,
            pending_action: None,
            action_approved: false,
            run_status: RunStatus::Running,
            checkpoint_node: None,
            generation: 0,
            should_summarize: false,
            summary: None,
        }
    }

    /// Append a message unless one with the same id is already present.
    ///
    /// Returns true when the message was appended. This is the in-memory
    /// half of the idempotent-append contract; storage backends enforce the
    /// same rule per id.
    pub fn push_message(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Structural invariants that must hold after every node execution.
    pub fn check_invariants(&self) -> Result<(), StateError> {
        let suspended = self.run_status == RunStatus::Suspended;
        if suspended != self.pending_action.is_some() {
            return Err(StateError::PendingActionMismatch {
                status: self.run_status,
                has_pending: self.pending_action.is_some(),
            });
        }
        if suspended != self.checkpoint_node.is_some() {
            return Err(StateError::CheckpointNodeMismatch {
                status: self.run_status,
            });
        }
        Ok(())
    }
}

/// Violations of the state model's structural invariants.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    /// A node tried to assign `intent` after classification already did.
    #[error("intent already assigned for this turn")]
    #[diagnostic(
        code(chatloom::state::intent_reassigned),
        help("Only the classification node may set intent, exactly once per turn.")
    )]
    IntentReassigned,

    /// `pending_action` presence disagrees with the run status.
    #[error("pending action present={has_pending} but run status is {status}")]
    #[diagnostic(
        code(chatloom::state::pending_action_mismatch),
        help("A pending action must exist exactly while the run is SUSPENDED.")
    )]
    PendingActionMismatch {
        status: RunStatus,
        has_pending: bool,
    },

    /// `checkpoint_node` presence disagrees with the run status.
    #[error("checkpoint node presence disagrees with run status {status}")]
    #[diagnostic(
        code(chatloom::state::checkpoint_node_mismatch),
        help("The resume node must be recorded exactly while the run is SUSPENDED.")
    )]
    CheckpointNodeMismatch { status: RunStatus },
}

/// Partial state update returned by a node.
///
/// All fields are optional so a node only states what it changed; the
/// executor merges deltas with [`StateDelta::apply`]. Clearing flags are
/// explicit because `None` means "untouched", not "cleared".
#[derive(Clone, Debug, Default)]
pub struct StateDelta {
    pub conversation_id: Option<String>,
    /// Messages to append (deduplicated by id).
    pub messages: Option<Vec<Message>>,
    pub profile: Option<UserProfile>,
    pub first_contact: Option<bool>,
    pub extracted_name: Option<String>,
    pub user_context: Option<String>,
    pub intent: Option<Intent>,
    /// Replaces the retrieved-context window for this turn.
    pub retrieved: Option<Vec<ScoredPassage>>,
    /// Replaces the few-shot window for this turn.
    pub examples: Option<Vec<crate::fewshot::FewShotExample>>,
    pub reply: Option<String>,
    pub flagged_action: Option<PendingAction>,
    pub pending_action: Option<PendingAction>,
    pub run_status: Option<RunStatus>,
    pub checkpoint_node: Option<NodeId>,
    pub generation: Option<u64>,
    pub should_summarize: Option<bool>,
    pub summary: Option<String>,
    pub clear_flagged_action: bool,
    pub clear_pending_action: bool,
    pub clear_checkpoint_node: bool,
}

impl StateDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Merge this delta into the state, enforcing append-only messages and
    /// set-once intent.
    pub fn apply(self, state: &mut ConversationState) -> Result<(), StateError> {
        if let Some(id) = self.conversation_id {
            state.conversation_id = id;
        }
        if let Some(messages) = self.messages {
            for message in messages {
                state.push_message(message);
            }
        }
        if let Some(profile) = self.profile {
            state.user_profile = Some(profile);
        }
        if let Some(first) = self.first_contact {
            state.first_contact = first;
        }
        if let Some(name) = self.extracted_name {
            state.extracted_name = Some(name);
        }
        if let Some(context) = self.user_context {
            state.user_context = Some(context);
        }
        if let Some(intent) = self.intent {
            if state.intent.is_some() {
                return Err(StateError::IntentReassigned);
            }
            state.intent = Some(intent);
        }
        if let Some(retrieved) = self.retrieved {
            state.retrieved_context = retrieved;
        }
        if let Some(examples) = self.examples {
            state.few_shot_examples = examples;
        }
        if let Some(reply) = self.reply {
            state.reply = Some(reply);
        }
        if self.clear_flagged_action {
            state.flagged_action = None;
        }
        if let Some(action) = self.flagged_action {
            state.flagged_action = Some(action);
        }
        if self.clear_pending_action {
            state.pending_action = None;
        }
        if let Some(action) = self.pending_action {
            state.pending_action = Some(action);
        }
        if let Some(status) = self.run_status {
            state.run_status = status;
        }
        if self.clear_checkpoint_node {
            state.checkpoint_node = None;
        }
        if let Some(node) = self.checkpoint_node {
            state.checkpoint_node = Some(node);
        }
        if let Some(generation) = self.generation {
            state.generation = generation;
        }
        if let Some(should) = self.should_summarize {
            state.should_summarize = should;
        }
        if let Some(summary) = self.summary {
            state.summary = Some(summary);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn() -> ConversationState {
        ConversationState::new_turn("c1", Channel::WhatsApp, "u1", "hello")
    }

    #[test]
    fn channel_parse_roundtrip() {
        assert_eq!(Channel::parse("WhatsApp"), Channel::WhatsApp);
        assert_eq!(Channel::parse("email"), Channel::Email);
        assert_eq!(
            Channel::parse("carrier-pigeon"),
            Channel::Other("carrier-pigeon".to_string())
        );
        assert_eq!(Channel::parse("carrier-pigeon").as_str(), "carrier-pigeon");
    }

    #[test]
    fn intent_parse_fails_closed() {
        assert_eq!(Intent::from_model_output("COMPLAINT"), Intent::Complaint);
        assert_eq!(
            Intent::from_model_output("This looks like sales to me"),
            Intent::Sales
        );
        assert_eq!(Intent::from_model_output(""), Intent::General);
        assert_eq!(Intent::from_model_output("gibberish"), Intent::General);
    }

    #[test]
    fn messages_are_append_only_and_deduplicated() {
        let mut state = turn();
        let m = Message::with_id("t:user", Message::USER, "hello");
        assert!(state.push_message(m.clone()));
        assert!(!state.push_message(m));
        assert_eq!(state.messages.len(), 1);

        let before = state.messages.len();
        StateDelta::new()
            .with_messages(vec![Message::with_id("t:user", Message::USER, "hello")])
            .apply(&mut state)
            .expect("apply");
        assert_eq!(state.messages.len(), before);
    }

    #[test]
    fn intent_is_set_exactly_once() {
        let mut state = turn();
        StateDelta::new()
            .with_intent(Intent::Support)
            .apply(&mut state)
            .expect("first assignment");
        let err = StateDelta::new()
            .with_intent(Intent::Sales)
            .apply(&mut state)
            .expect_err("second assignment must fail");
        assert!(matches!(err, StateError::IntentReassigned));
        assert_eq!(state.intent, Some(Intent::Support));
    }

    #[test]
    fn invariants_track_suspension() {
        let mut state = turn();
        assert!(state.check_invariants().is_ok());

        state.run_status = RunStatus::Suspended;
        assert!(state.check_invariants().is_err());

        state.pending_action = Some(PendingAction::new(ActionKind::Refund, "refund", "flagged"));
        state.checkpoint_node = Some(NodeId::ExecuteApprovedAction);
        assert!(state.check_invariants().is_ok());

        state.run_status = RunStatus::Running;
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn clearing_flags_are_explicit() {
        let mut state = turn();
        state.flagged_action = Some(PendingAction::new(ActionKind::Refund, "r", "j"));

        // An empty delta leaves the staged action alone.
        StateDelta::new().apply(&mut state).expect("apply");
        assert!(state.flagged_action.is_some());

        let delta = StateDelta {
            clear_flagged_action: true,
            ..Default::default()
        };
        delta.apply(&mut state).expect("apply");
        assert!(state.flagged_action.is_none());
    }
}
