//! The exposed façade: `handle_message` and `resume`.
//!
//! [`AgentService`] validates inbound messages before any state exists,
//! enforces at most one active run per conversation through a per-
//! conversation async mutex, and maps run outcomes to user-visible
//! receipts. A FAILED run always yields the generic fallback reply; the
//! underlying cause goes to tracing only, never to the end user.

use std::sync::{Arc, Mutex};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::clients::{ModelClient, RetrievalClient};
use crate::fewshot::ExampleBank;
use crate::node::NodeId;
use crate::nodes::NodeRegistry;
use crate::runtime::checkpoint::{Checkpointer, CheckpointerError};
use crate::runtime::coordinator::{CoordinatorError, Decision, ResumeCoordinator, ResumeReceipt};
use crate::runtime::executor::{ExecutorError, GraphExecutor, RunOutcome};
use crate::runtime::RuntimeConfig;
use crate::state::{Channel, ConversationState, Intent, RunStatus};
use crate::storage::{ActionStatus, Storage, StorageError};

/// Reply shown whenever a run fails; causes are never echoed to the user.
pub const FALLBACK_REPLY: &str =
    "Sorry, something went wrong while processing your message. Please try again in a moment.";

/// Reply for an inbound message while a previous turn awaits approval.
pub const AWAITING_APPROVAL_REPLY: &str =
    "Your previous request is still awaiting approval. Reply \"cancel\" to withdraw it.";

/// Reply attached to a freshly suspended turn.
pub const SENT_FOR_APPROVAL_REPLY: &str =
    "Your request needs a manager's approval. We'll get back to you as soon as it is reviewed.";

/// Outcome of one inbound message.
#[derive(Clone, Debug)]
pub struct TurnReceipt {
    pub reply_text: String,
    pub conversation_id: String,
    pub intent: Option<Intent>,
    pub run_status: RunStatus,
}

/// Errors surfaced to the caller of the service.
#[derive(Debug, Error, Diagnostic)]
pub enum ServiceError {
    /// Malformed inbound message; rejected before a state exists.
    #[error("invalid message: {reason}")]
    #[diagnostic(
        code(chatloom::service::validation),
        help("Channel, user identifier, and content must all be non-empty.")
    )]
    Validation { reason: String },

    /// Resume requested on a conversation that is not suspended.
    #[error("conversation cannot be resumed: {reason}")]
    #[diagnostic(code(chatloom::service::consistency))]
    Consistency { reason: String },

    /// Duplicate decision on an already-resolved action; nothing changed.
    #[error("decision already applied; action is {status}")]
    #[diagnostic(
        code(chatloom::service::approval_conflict),
        help("The first decision won; this one was a no-op.")
    )]
    ApprovalConflict { status: ActionStatus },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),
}

impl From<CoordinatorError> for ServiceError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::AlreadyResolved { status } => {
                ServiceError::ApprovalConflict { status }
            }
            CoordinatorError::UnknownConversation { conversation_id } => {
                ServiceError::Consistency {
                    reason: format!("unknown conversation {conversation_id}"),
                }
            }
            CoordinatorError::NotSuspended { current } => ServiceError::Consistency {
                reason: format!("conversation is {current}, not SUSPENDED"),
            },
            CoordinatorError::MissingResumeNode => ServiceError::Consistency {
                reason: "suspended checkpoint has no resume node".to_string(),
            },
            CoordinatorError::Checkpointer(e) => ServiceError::Checkpointer(e),
            CoordinatorError::Storage(e) => ServiceError::Storage(e),
            CoordinatorError::Executor(e) => ServiceError::Executor(e),
        }
    }
}

/// The conversational agent backend.
///
/// Construct once at startup; the workflow definition inside is immutable
/// and shared across concurrent conversations, while every run owns its
/// own state.
pub struct AgentService {
    storage: Arc<dyn Storage>,
    checkpointer: Arc<dyn Checkpointer>,
    executor: Arc<GraphExecutor>,
    coordinator: ResumeCoordinator,
    locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        checkpointer: Arc<dyn Checkpointer>,
        model: Arc<dyn ModelClient>,
        retrieval: Arc<dyn RetrievalClient>,
        examples: Arc<ExampleBank>,
        config: RuntimeConfig,
    ) -> Self {
        let registry = NodeRegistry::standard(
            storage.clone(),
            model,
            retrieval,
            examples,
            &config,
        );
        let executor = Arc::new(GraphExecutor::new(
            registry,
            checkpointer.clone(),
            config,
        ));
        let coordinator =
            ResumeCoordinator::new(executor.clone(), storage.clone(), checkpointer.clone());
        Self {
            storage,
            checkpointer,
            executor,
            coordinator,
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Serialize all work on one conversation; the map only ever grows by
    /// one entry per conversation.
    fn conversation_lock(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("conversation lock map poisoned");
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Process one inbound message to a terminal or suspended status.
    ///
    /// A second message for the same conversation waits until the current
    /// run finishes, preserving receipt order and the single-writer
    /// invariant on history and profile.
    #[instrument(skip(self, content), err)]
    pub async fn handle_message(
        &self,
        channel: &str,
        user_identifier: &str,
        content: &str,
    ) -> Result<TurnReceipt, ServiceError> {
        validate_inbound(channel, user_identifier, content)?;
        let channel = Channel::parse(channel);

        let conversation = self
            .storage
            .find_or_create_conversation(&channel, user_identifier)
            .await?;
        let lock = self.conversation_lock(&conversation.id);
        let _guard = lock.lock().await;

        // A suspended turn owns the conversation's checkpoint; a new run
        // would overwrite it. Answer with a notice (or honor a cancel).
        let latest = self.checkpointer.load_latest(&conversation.id).await?;
        if let Some(checkpoint) = &latest
            && checkpoint.state.run_status == RunStatus::Suspended
        {
            if content.trim().eq_ignore_ascii_case("cancel") {
                let receipt = self
                    .coordinator
                    .resume(&conversation.id, Decision::Cancel)
                    .await?;
                return Ok(TurnReceipt {
                    reply_text: receipt.reply_text,
                    conversation_id: conversation.id,
                    intent: checkpoint.state.intent,
                    run_status: receipt.run_status,
                });
            }
            tracing::info!(conversation = %conversation.id, "message while suspended; not starting a run");
            return Ok(TurnReceipt {
                reply_text: AWAITING_APPROVAL_REPLY.to_string(),
                conversation_id: conversation.id,
                intent: None,
                run_status: RunStatus::Suspended,
            });
        }

        let mut state = ConversationState::new_turn(
            conversation.id.clone(),
            channel,
            user_identifier,
            content,
        );
        // Generations number suspensions across the conversation's
        // lifetime, so continue from the last checkpoint.
        if let Some(checkpoint) = latest {
            state.generation = checkpoint.generation;
        }

        let report = self.executor.run(state, NodeId::ManageHistory).await?;
        let reply_text = match &report.outcome {
            RunOutcome::Completed => report
                .state
                .reply
                .clone()
                .unwrap_or_else(|| FALLBACK_REPLY.to_string()),
            RunOutcome::Suspended => SENT_FOR_APPROVAL_REPLY.to_string(),
            RunOutcome::Failed(failure) => {
                tracing::error!(failure = %failure, "run failed; returning fallback reply");
                FALLBACK_REPLY.to_string()
            }
        };

        Ok(TurnReceipt {
            reply_text,
            conversation_id: conversation.id,
            intent: report.state.intent,
            run_status: report.state.run_status,
        })
    }

    /// Apply an approval decision to a suspended conversation.
    #[instrument(skip(self), fields(conversation = %conversation_id), err)]
    pub async fn resume(
        &self,
        conversation_id: &str,
        decision: Decision,
    ) -> Result<ResumeReceipt, ServiceError> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;
        Ok(self.coordinator.resume(conversation_id, decision).await?)
    }
}

fn validate_inbound(
    channel: &str,
    user_identifier: &str,
    content: &str,
) -> Result<(), ServiceError> {
    if channel.trim().is_empty() {
        return Err(ServiceError::Validation {
            reason: "channel must not be empty".to_string(),
        });
    }
    if user_identifier.trim().is_empty() {
        return Err(ServiceError::Validation {
            reason: "user identifier must not be empty".to_string(),
        });
    }
    if content.trim().is_empty() {
        return Err(ServiceError::Validation {
            reason: "message content must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_blank_fields() {
        assert!(validate_inbound("web", "u1", "hello").is_ok());
        assert!(validate_inbound("", "u1", "hello").is_err());
        assert!(validate_inbound("web", "  ", "hello").is_err());
        assert!(validate_inbound("web", "u1", "\n\t").is_err());
    }
}
