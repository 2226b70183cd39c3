//! Interrupt/resume coordination.
//!
//! A suspended run is durable data: the SUSPENDED checkpoint holds the
//! state and the node to resume at. The coordinator consumes an external
//! decision and either re-enters the executor at that node (approval) or
//! finalizes the conversation without touching the graph (rejection,
//! cancellation). Committed nodes are never re-executed; duplicate
//! decisions are detected through the resolved pending-action record.
//!
//! Callers must serialize access per conversation (the service layer holds
//! the per-conversation lock before calling in).

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::message::Message;
use crate::node::NodeId;
use crate::runtime::checkpoint::{Checkpoint, Checkpointer, CheckpointerError};
use crate::runtime::executor::{ExecutorError, GraphExecutor, RunOutcome};
use crate::state::{ConversationState, RunStatus};
use crate::storage::{ActionStatus, Storage, StorageError};

/// External decision on a suspended run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve { note: Option<String> },
    Reject { note: Option<String> },
    /// Discard the pending action without executing it.
    Cancel,
}

/// Result of consuming a decision.
#[derive(Clone, Debug)]
pub struct ResumeReceipt {
    pub reply_text: String,
    pub run_status: RunStatus,
}

/// Errors from the resume path.
#[derive(Debug, Error, Diagnostic)]
pub enum CoordinatorError {
    /// No checkpoint exists for the conversation.
    #[error("unknown conversation: {conversation_id}")]
    #[diagnostic(code(chatloom::coordinator::unknown_conversation))]
    UnknownConversation { conversation_id: String },

    /// The conversation is not suspended; nothing to decide.
    #[error("conversation is {current}, not SUSPENDED")]
    #[diagnostic(
        code(chatloom::coordinator::not_suspended),
        help("Only a SUSPENDED conversation accepts an approval decision.")
    )]
    NotSuspended { current: RunStatus },

    /// A decision already resolved this action; this one is a no-op.
    #[error("pending action already resolved as {status}")]
    #[diagnostic(
        code(chatloom::coordinator::already_resolved),
        help("Duplicate decisions are reported, never re-executed.")
    )]
    AlreadyResolved { status: ActionStatus },

    /// The suspended checkpoint is missing its resume node.
    #[error("suspended checkpoint has no resume node")]
    #[diagnostic(code(chatloom::coordinator::missing_resume_node))]
    MissingResumeNode,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),
}

/// Consumes approval decisions and re-enters the executor.
pub struct ResumeCoordinator {
    executor: Arc<GraphExecutor>,
    storage: Arc<dyn Storage>,
    checkpointer: Arc<dyn Checkpointer>,
}

impl ResumeCoordinator {
    #[must_use]
    pub fn new(
        executor: Arc<GraphExecutor>,
        storage: Arc<dyn Storage>,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            executor,
            storage,
            checkpointer,
        }
    }

    /// Apply a decision to a suspended conversation.
    #[instrument(skip(self), fields(conversation = %conversation_id), err)]
    pub async fn resume(
        &self,
        conversation_id: &str,
        decision: Decision,
    ) -> Result<ResumeReceipt, CoordinatorError> {
        let checkpoint = self
            .checkpointer
            .load_latest(conversation_id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownConversation {
                conversation_id: conversation_id.to_string(),
            })?;
        let mut state = checkpoint.state;

        if state.run_status != RunStatus::Suspended {
            // A resolved record means someone already decided; report that
            // rather than a generic consistency failure.
            if let Some(record) = self.storage.latest_pending_action(conversation_id).await?
                && record.status != ActionStatus::Pending
            {
                return Err(CoordinatorError::AlreadyResolved {
                    status: record.status,
                });
            }
            return Err(CoordinatorError::NotSuspended {
                current: state.run_status,
            });
        }

        match decision {
            Decision::Approve { note } => {
                let entry = state
                    .checkpoint_node
                    .take()
                    .ok_or(CoordinatorError::MissingResumeNode)?;
                state.action_approved = true;
                state.run_status = RunStatus::Running;
                if let Some(note) = note {
                    tracing::info!(%note, "approval note recorded");
                }
                tracing::info!(resume_node = %entry, "approval received, re-entering graph");

                let report = self.executor.run(state, entry).await?;
                let reply_text = match &report.outcome {
                    RunOutcome::Failed(failure) => {
                        tracing::error!(failure = %failure, "approved resume failed");
                        crate::service::FALLBACK_REPLY.to_string()
                    }
                    _ => report.state.reply.clone().unwrap_or_default(),
                };
                Ok(ResumeReceipt {
                    reply_text,
                    run_status: report.state.run_status,
                })
            }
            Decision::Reject { note } => {
                let notice = match note {
                    Some(note) => format!(
                        "Your request was declined: a manager did not authorize this action. ({note})"
                    ),
                    None => "Your request was declined: a manager did not authorize this action."
                        .to_string(),
                };
                self.finalize(&mut state, conversation_id, ActionStatus::Rejected, &notice)
                    .await
            }
            Decision::Cancel => {
                let notice = "The pending request was cancelled before a decision was made.";
                self.finalize(&mut state, conversation_id, ActionStatus::Cancelled, notice)
                    .await
            }
        }
    }

    /// Reject/cancel path: resolve the action and complete the turn
    /// without re-entering the graph.
    async fn finalize(
        &self,
        state: &mut ConversationState,
        conversation_id: &str,
        status: ActionStatus,
        notice: &str,
    ) -> Result<ResumeReceipt, CoordinatorError> {
        let action = state
            .pending_action
            .take()
            .ok_or(CoordinatorError::MissingResumeNode)?;
        let resolved = self
            .storage
            .resolve_pending_action(conversation_id, &action.id, status)
            .await?;
        if !resolved {
            return Err(CoordinatorError::AlreadyResolved { status });
        }

        let reply = match state.reply.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n\n{notice}"),
            _ => notice.to_string(),
        };
        let message = Message::with_id(
            format!("{}:assistant", state.turn_id),
            Message::ASSISTANT,
            &reply,
        );
        self.storage.append_message(conversation_id, &message).await?;
        state.push_message(message);
        state.reply = Some(reply.clone());
        state.checkpoint_node = None;
        state.run_status = RunStatus::Completed;

        let final_step = NodeId::ExecuteApprovedAction;
        self.checkpointer
            .save(Checkpoint::capture(state, 0, final_step))
            .await?;
        tracing::info!(status = %status, "suspended run finalized without execution");

        Ok(ResumeReceipt {
            reply_text: reply,
            run_status: RunStatus::Completed,
        })
    }
}
