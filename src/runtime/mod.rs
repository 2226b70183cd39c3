//! Workflow runtime: configuration, checkpointing, the graph executor, and
//! the interrupt/resume coordinator.
//!
//! The runtime layer is what makes suspension durable: the executor
//! persists a [`Checkpoint`] before every node it runs, and the coordinator
//! turns a stored SUSPENDED checkpoint plus an external decision back into
//! a running graph, possibly in a different process than the one that
//! suspended it.

pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod config;
pub mod coordinator;
pub mod executor;

pub use checkpoint::{Checkpoint, Checkpointer, CheckpointerError, InMemoryCheckpointer};
#[cfg(feature = "sqlite")]
pub use checkpoint_sqlite::SqliteCheckpointer;
pub use config::RuntimeConfig;
pub use coordinator::{CoordinatorError, Decision, ResumeCoordinator, ResumeReceipt};
pub use executor::{ExecutorError, GraphExecutor, RunFailure, RunOutcome, RunReport};
