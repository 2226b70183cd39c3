//! Sensitive-action detection, durable recording, and approved execution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::node::{Node, NodeContext, NodeError, NodeId, SideEffect};
use crate::state::{ActionKind, ConversationState, PendingAction, RunStatus, StateDelta};
use crate::storage::{ActionStatus, Storage};

/// Keyword groups checked in priority order; the first hit wins.
const TRIGGERS: [(ActionKind, &[&str]); 4] = [
    (
        ActionKind::Refund,
        &["refund", "reimburse", "money back", "charge back", "estorno", "reembolso"],
    ),
    (
        ActionKind::AccountDeletion,
        &["delete my account", "close my account", "remove my data", "excluir conta"],
    ),
    (
        ActionKind::PermissionChange,
        &["admin access", "elevated permission", "restart the system", "change the database"],
    ),
    (
        ActionKind::SensitiveInfo,
        &["internal document", "confidential", "credentials", "api key"],
    ),
];

/// Inspects the inbound text and the generated reply for sensitive-action
/// keywords and stages a [`PendingAction`] when one matches.
///
/// Pure transform: the staged action becomes durable (and the run
/// suspends) only when [`CreatePendingAction`] runs.
pub struct DetectCriticalAction;

impl DetectCriticalAction {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }

    fn scan(text: &str) -> Option<(ActionKind, &'static str)> {
        let lowered = text.to_lowercase();
        for (kind, keywords) in TRIGGERS {
            for &keyword in keywords {
                if lowered.contains(keyword) {
                    return Some((kind, keyword));
                }
            }
        }
        None
    }
}

#[async_trait]
impl Node for DetectCriticalAction {
    fn side_effect(&self) -> SideEffect {
        SideEffect::PureTransform
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let reply = state.reply.as_deref().unwrap_or_default();
        let hit = Self::scan(&state.current_input)
            .or_else(|| Self::scan(reply));

        let mut delta = StateDelta::new();
        if let Some((kind, keyword)) = hit {
            tracing::info!(kind = %kind, keyword, "sensitive action flagged for approval");
            delta.flagged_action = Some(PendingAction::new(
                kind,
                &state.current_input,
                &format!("Matched sensitive keyword \"{keyword}\"; requires manager approval."),
            ));
        }
        Ok(delta)
    }
}

/// Durably records the staged action and suspends the run at the
/// execution node. The suspension generation is bumped here; together
/// with the conversation and action ids it keys approval idempotency.
pub struct CreatePendingAction {
    storage: Arc<dyn Storage>,
}

impl CreatePendingAction {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Node for CreatePendingAction {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalWrite
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let action = state
            .flagged_action
            .clone()
            .ok_or(NodeError::MissingInput {
                what: "flagged action",
            })?;
        let generation = state.generation + 1;
        self.storage
            .record_pending_action(&state.conversation_id, &action, generation)
            .await?;
        tracing::info!(
            action = %action.kind,
            generation,
            "pending action recorded; suspending run"
        );

        let mut delta = StateDelta::new();
        delta.pending_action = Some(action);
        delta.clear_flagged_action = true;
        delta.run_status = Some(RunStatus::Suspended);
        delta.checkpoint_node = Some(NodeId::ExecuteApprovedAction);
        delta.generation = Some(generation);
        Ok(delta)
    }
}

/// Entered only when a suspended run resumes with approval: performs the
/// action's side effect, folds a confirmation into the reply, and returns
/// the run to normal flow.
pub struct ExecuteApprovedAction {
    storage: Arc<dyn Storage>,
}

impl ExecuteApprovedAction {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn confirmation(kind: ActionKind) -> String {
        match kind {
            ActionKind::Refund => {
                "Your refund has been processed. The amount will be credited within 5-7 \
                 business days."
                    .to_string()
            }
            ActionKind::AccountDeletion => {
                "Account deletion has been initiated. Your data will be removed within 30 days."
                    .to_string()
            }
            kind => format!("The approved action ({kind}) has been carried out."),
        }
    }
}

#[async_trait]
impl Node for ExecuteApprovedAction {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalWrite
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let action = state.pending_action.clone().ok_or(NodeError::MissingInput {
            what: "pending action",
        })?;
        if !state.action_approved {
            // Rejections are finalized by the coordinator; reaching this
            // node without approval is a wiring bug upstream.
            return Err(NodeError::MissingInput {
                what: "approval decision",
            });
        }

        self.storage
            .resolve_pending_action(&state.conversation_id, &action.id, ActionStatus::Approved)
            .await?;
        tracing::info!(action = %action.kind, "approved action executed");

        let confirmation = Self::confirmation(action.kind);
        let reply = match state.reply.as_deref() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n\n{confirmation}"),
            _ => confirmation,
        };

        let mut delta = StateDelta::new().with_reply(reply);
        delta.clear_pending_action = true;
        delta.clear_checkpoint_node = true;
        delta.run_status = Some(RunStatus::Running);
        Ok(delta)
    }
}
