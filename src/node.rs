//! Node identity and execution contract.
//!
//! The workflow is a closed set of stages: [`NodeId`] enumerates every node
//! the graph can ever visit, so routing is checked exhaustively at compile
//! time instead of going through string-keyed lookup. Each stage implements
//! [`Node`], receives the current state read-only, and returns a
//! [`StateDelta`](crate::state::StateDelta) the executor merges.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::clients::ClientError;
use crate::state::{ConversationState, StateDelta, StateError};
use crate::storage::StorageError;

/// Identity of a processing stage in the workflow graph.
///
/// A closed enumeration: adding a node means adding a variant here, an
/// entry in the registry, and an arm in the router, and the compiler walks
/// you through the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    ManageHistory,
    CheckUserProfile,
    LoadUserContext,
    ClassifyMessage,
    RetrieveKnowledge,
    GenerateResponse,
    ExtractUserInfo,
    SaveUserProfile,
    DetectCriticalAction,
    CreatePendingAction,
    ExecuteApprovedAction,
    SaveResponse,
    SummarizeConversation,
    SaveUserContext,
}

impl NodeId {
    /// Every node in the graph, in canonical (happy-path) order.
    pub const ALL: [NodeId; 14] = [
        NodeId::ManageHistory,
        NodeId::CheckUserProfile,
        NodeId::LoadUserContext,
        NodeId::ClassifyMessage,
        NodeId::RetrieveKnowledge,
        NodeId::GenerateResponse,
        NodeId::ExtractUserInfo,
        NodeId::SaveUserProfile,
        NodeId::DetectCriticalAction,
        NodeId::CreatePendingAction,
        NodeId::ExecuteApprovedAction,
        NodeId::SaveResponse,
        NodeId::SummarizeConversation,
        NodeId::SaveUserContext,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::ManageHistory => "manage_history",
            NodeId::CheckUserProfile => "check_user_profile",
            NodeId::LoadUserContext => "load_user_context",
            NodeId::ClassifyMessage => "classify_message",
            NodeId::RetrieveKnowledge => "retrieve_knowledge",
            NodeId::GenerateResponse => "generate_response",
            NodeId::ExtractUserInfo => "extract_user_info",
            NodeId::SaveUserProfile => "save_user_profile",
            NodeId::DetectCriticalAction => "detect_critical_action",
            NodeId::CreatePendingAction => "create_pending_action",
            NodeId::ExecuteApprovedAction => "execute_approved_action",
            NodeId::SaveResponse => "save_response",
            NodeId::SummarizeConversation => "summarize_conversation",
            NodeId::SaveUserContext => "save_user_context",
        }
    }

    /// Decode the persisted string form back into a node id.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        NodeId::ALL.into_iter().find(|id| id.as_str() == s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared side-effect class of a node.
///
/// Pure transforms never leave the process; external reads call the model
/// or retrieval collaborators (and own a retry policy for transient
/// failures); external writes mutate storage and must be idempotent under
/// retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideEffect {
    PureTransform,
    ExternalRead,
    ExternalWrite,
}

/// Execution context handed to a node for one invocation.
#[derive(Clone, Copy, Debug)]
pub struct NodeContext {
    /// The node being executed.
    pub node: NodeId,
    /// One-based step number within the current run.
    pub step: u32,
}

/// A single unit of work in the workflow.
///
/// Implementations must be total for any well-formed state: expected
/// absences (no profile, empty retrieval) are normal results, and only
/// genuinely exceptional conditions (collaborator outage after retries,
/// missing inputs that upstream nodes guarantee) surface as [`NodeError`].
#[async_trait]
pub trait Node: Send + Sync {
    /// The side-effect class this node declares.
    fn side_effect(&self) -> SideEffect;

    /// Execute against a read-only view of the state.
    async fn run(
        &self,
        state: &ConversationState,
        ctx: NodeContext,
    ) -> Result<StateDelta, NodeError>;
}

/// Fatal errors from node execution; converted to a FAILED run at the
/// executor boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Data an upstream node should have produced is missing.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(chatloom::node::missing_input),
        help("Check that the upstream node produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// An external collaborator failed (after any configured retries).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Client(#[from] ClientError),

    /// The persistence collaborator failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    /// A state invariant was violated while merging the node's delta.
    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),
}
