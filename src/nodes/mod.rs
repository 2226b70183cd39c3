//! Processing-stage implementations for the conversation workflow.
//!
//! Each stage is a small struct owning exactly the collaborators it needs
//! (storage, model, retrieval, example bank) plus any tuning values cloned
//! from the runtime configuration. The [`NodeRegistry`] wires one instance
//! of every stage and hands them to the executor by [`NodeId`].

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::clients::{ModelClient, RetrievalClient};
use crate::fewshot::ExampleBank;
use crate::node::{Node, NodeId};
use crate::runtime::RuntimeConfig;
use crate::storage::Storage;

mod actions;
mod classify;
mod history;
mod memory;
mod profile;
mod respond;
mod retrieve;

pub use actions::{CreatePendingAction, DetectCriticalAction, ExecuteApprovedAction};
pub use classify::ClassifyMessage;
pub use history::{ManageHistory, SaveResponse};
pub use memory::{LoadUserContext, SaveUserContext, SummarizeConversation};
pub use profile::{CheckUserProfile, ExtractUserInfo, SaveUserProfile};
pub use respond::GenerateResponse;
pub use retrieve::RetrieveKnowledge;

/// The full set of stages, keyed by identity.
///
/// Built once at startup together with the executor; immutable afterwards.
pub struct NodeRegistry {
    nodes: FxHashMap<NodeId, Arc<dyn Node>>,
}

impl NodeRegistry {
    /// Wire the standard workflow against the given collaborators.
    #[must_use]
    pub fn standard(
        storage: Arc<dyn Storage>,
        model: Arc<dyn ModelClient>,
        retrieval: Arc<dyn RetrievalClient>,
        examples: Arc<ExampleBank>,
        config: &RuntimeConfig,
    ) -> Self {
        let mut nodes: FxHashMap<NodeId, Arc<dyn Node>> = FxHashMap::default();
        nodes.insert(
            NodeId::ManageHistory,
            Arc::new(ManageHistory::new(storage.clone(), config.history_window)),
        );
        nodes.insert(
            NodeId::CheckUserProfile,
            Arc::new(CheckUserProfile::new(storage.clone())),
        );
        nodes.insert(
            NodeId::LoadUserContext,
            Arc::new(LoadUserContext::new(storage.clone())),
        );
        nodes.insert(
            NodeId::ClassifyMessage,
            Arc::new(ClassifyMessage::new(
                model.clone(),
                examples.clone(),
                config.retry.clone(),
                config.classify_examples,
            )),
        );
        nodes.insert(
            NodeId::RetrieveKnowledge,
            Arc::new(RetrieveKnowledge::new(
                retrieval,
                config.retry.clone(),
                config.retrieval_k,
            )),
        );
        nodes.insert(
            NodeId::GenerateResponse,
            Arc::new(GenerateResponse::new(
                model.clone(),
                examples,
                config.retry.clone(),
                config.respond_examples,
            )),
        );
        nodes.insert(NodeId::ExtractUserInfo, Arc::new(ExtractUserInfo::new()));
        nodes.insert(
            NodeId::SaveUserProfile,
            Arc::new(SaveUserProfile::new(storage.clone())),
        );
        nodes.insert(
            NodeId::DetectCriticalAction,
            Arc::new(DetectCriticalAction::new()),
        );
        nodes.insert(
            NodeId::CreatePendingAction,
            Arc::new(CreatePendingAction::new(storage.clone())),
        );
        nodes.insert(
            NodeId::ExecuteApprovedAction,
            Arc::new(ExecuteApprovedAction::new(storage.clone())),
        );
        nodes.insert(
            NodeId::SaveResponse,
            Arc::new(SaveResponse::new(
                storage.clone(),
                config.summarize_after_messages,
                config.summarize_after_chars,
            )),
        );
        nodes.insert(
            NodeId::SummarizeConversation,
            Arc::new(SummarizeConversation::new(model, config.retry.clone())),
        );
        nodes.insert(
            NodeId::SaveUserContext,
            Arc::new(SaveUserContext::new(storage)),
        );
        debug_assert_eq!(nodes.len(), NodeId::ALL.len());
        Self { nodes }
    }

    #[must_use]
    pub fn resolve(&self, id: NodeId) -> Option<&Arc<dyn Node>> {
        self.nodes.get(&id)
    }
}
