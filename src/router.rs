//! Static routing table for the workflow graph.
//!
//! [`route`] is a pure function from the node that just finished and the
//! current state to the next node (or [`Next::End`]). It is deterministic
//! and side-effect free, so recomputing a routing decision during resume
//! always reproduces the original choice. The match is exhaustive over the
//! closed [`NodeId`] enumeration; there is no string dispatch to get wrong.

use crate::node::NodeId;
use crate::state::ConversationState;

/// Routing decision after a node completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Node(NodeId),
    End,
}

/// Signature of the routing function; injectable into the executor so
/// tests can exercise the cycle guard with a deliberately bad table.
pub type RouterFn = fn(NodeId, &ConversationState) -> Next;

/// The production routing table.
///
/// Two conditional points: after critical-action detection (suspend path
/// when an action was flagged) and after the response is saved (summarize
/// only when the heuristics asked for it). Everything else is a fixed edge.
#[must_use]
pub fn route(node: NodeId, state: &ConversationState) -> Next {
    match node {
        NodeId::ManageHistory => Next::Node(NodeId::CheckUserProfile),
        NodeId::CheckUserProfile => Next::Node(NodeId::LoadUserContext),
        NodeId::LoadUserContext => Next::Node(NodeId::ClassifyMessage),
        NodeId::ClassifyMessage => Next::Node(NodeId::RetrieveKnowledge),
        NodeId::RetrieveKnowledge => Next::Node(NodeId::GenerateResponse),
        NodeId::GenerateResponse => Next::Node(NodeId::ExtractUserInfo),
        NodeId::ExtractUserInfo => Next::Node(NodeId::SaveUserProfile),
        NodeId::SaveUserProfile => Next::Node(NodeId::DetectCriticalAction),
        NodeId::DetectCriticalAction => {
            if state.flagged_action.is_some() {
                Next::Node(NodeId::CreatePendingAction)
            } else {
                Next::Node(NodeId::SaveResponse)
            }
        }
        NodeId::CreatePendingAction => Next::Node(NodeId::ExecuteApprovedAction),
        NodeId::ExecuteApprovedAction => Next::Node(NodeId::SaveResponse),
        NodeId::SaveResponse => {
            if state.should_summarize {
                Next::Node(NodeId::SummarizeConversation)
            } else {
                Next::End
            }
        }
        NodeId::SummarizeConversation => Next::Node(NodeId::SaveUserContext),
        NodeId::SaveUserContext => Next::End,
    }
}
