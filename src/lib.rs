//! # Chatloom: a checkpointed conversational agent backend
//!
//! Chatloom answers multichannel messages (whatsapp, email, telegram, web)
//! using retrieved knowledge, per-user memory, and curated few-shot examples,
//! while routing sensitive actions through human approval.
//!
//! The heart of the crate is the **conversation workflow engine**: every
//! inbound message drives one *run* of a fixed directed graph of processing
//! nodes. The executor checkpoints state durably before each node, so a run
//! can suspend mid-flight to wait for a human decision and resume later,
//! possibly from a different process.
//!
//! ## Core concepts
//!
//! - **State**: [`state::ConversationState`] is the working memory of one
//!   run; nodes return [`state::StateDelta`] partial updates that the
//!   executor merges.
//! - **Nodes**: a closed enumeration ([`node::NodeId`]) of stages, each an
//!   implementation of the [`node::Node`] trait with a declared side-effect
//!   class.
//! - **Router**: [`router::route`] is a pure, exhaustively-matched function
//!   from the current node and state to the next node (or the end).
//! - **Executor**: [`runtime::GraphExecutor`] drives nodes in router order
//!   under a step budget, persisting a checkpoint before every node.
//! - **Suspension**: [`runtime::ResumeCoordinator`] turns a durable
//!   SUSPENDED checkpoint plus an external decision back into a running
//!   graph, exactly once.
//! - **Façade**: [`service::AgentService`] exposes `handle_message` and
//!   `resume`, adding validation and per-conversation mutual exclusion.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatloom::clients::{ClientError, ModelClient, RetrievalClient};
//! use chatloom::fewshot::ExampleBank;
//! use chatloom::runtime::{InMemoryCheckpointer, RuntimeConfig};
//! use chatloom::service::AgentService;
//! use chatloom::state::ScoredPassage;
//! use chatloom::storage::InMemoryStorage;
//!
//! struct EchoModel;
//!
//! #[async_trait::async_trait]
//! impl ModelClient for EchoModel {
//!     async fn generate(&self, _prompt: &str) -> Result<String, ClientError> {
//!         Ok("GENERAL".to_string())
//!     }
//! }
//!
//! struct NoIndex;
//!
//! #[async_trait::async_trait]
//! impl RetrievalClient for NoIndex {
//!     async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredPassage>, ClientError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = AgentService::new(
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(InMemoryCheckpointer::new()),
//!     Arc::new(EchoModel),
//!     Arc::new(NoIndex),
//!     Arc::new(ExampleBank::new()),
//!     RuntimeConfig::default(),
//! );
//!
//! let receipt = service.handle_message("web", "user-1", "What are your hours?").await?;
//! println!("{} ({})", receipt.reply_text, receipt.run_status);
//! # Ok(())
//! # }
//! ```

pub mod clients;
pub mod fewshot;
pub mod message;
pub mod node;
pub mod nodes;
pub mod retry;
pub mod router;
pub mod runtime;
pub mod service;
pub mod state;
pub mod storage;
pub mod telemetry;
