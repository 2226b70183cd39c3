//! The graph executor: drives one run through the workflow.
//!
//! Execution within a run is strictly sequential; the router picks every
//! transition. Before each node the executor durably persists a
//! checkpoint, so a crash between node N and N+1 loses at most one node's
//! work and restart always finds the last committed state, never a
//! half-applied one. Node faults never escape: they convert to a FAILED
//! outcome with the fault recorded, and the caller decides what the user
//! sees.

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::node::{NodeContext, NodeId};
use crate::nodes::NodeRegistry;
use crate::router::{Next, RouterFn, route};
use crate::runtime::checkpoint::{Checkpoint, Checkpointer, CheckpointerError};
use crate::runtime::config::RuntimeConfig;
use crate::state::{ConversationState, RunStatus};
use std::sync::Arc;

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The router reached the end of the graph.
    Completed,
    /// A node requested suspension; the checkpoint records where to
    /// resume.
    Suspended,
    /// A guard tripped or a node faulted; see the failure.
    Failed(RunFailure),
}

/// Failure cause recorded on a FAILED run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunFailure {
    /// The step budget was exceeded; almost certainly a routing cycle.
    RoutingCycle { budget: u32, trace: Vec<NodeId> },
    /// A node raised a fatal error.
    Node { node: NodeId, message: String },
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFailure::RoutingCycle { budget, trace } => {
                let path: Vec<&str> = trace.iter().map(NodeId::as_str).collect();
                write!(
                    f,
                    "routing cycle detected: step budget {budget} exceeded (trace: {})",
                    path.join(" -> ")
                )
            }
            RunFailure::Node { node, message } => {
                write!(f, "node {node} failed: {message}")
            }
        }
    }
}

/// Result of driving one run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub state: ConversationState,
    /// Node executions consumed (successful or not).
    pub steps: u32,
    /// Nodes executed, in order.
    pub trace: Vec<NodeId>,
    pub outcome: RunOutcome,
}

/// Infrastructure errors the executor cannot convert into a run outcome.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    /// The registry has no implementation for a routed node.
    #[error("no implementation registered for node {node}")]
    #[diagnostic(
        code(chatloom::executor::unknown_node),
        help("Every NodeId variant must be registered before compiling the workflow.")
    )]
    UnknownNode { node: NodeId },

    /// The pre-node checkpoint could not be persisted; proceeding would
    /// break the crash-recovery guarantee.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),
}

/// Drives nodes in router order, checkpointing before each one.
///
/// The executor is immutable and shared across runs; each run owns its
/// state. The router function is injectable so tests can exercise the
/// cycle guard with a deliberately broken table.
pub struct GraphExecutor {
    registry: NodeRegistry,
    checkpointer: Arc<dyn Checkpointer>,
    config: RuntimeConfig,
    router: RouterFn,
}

impl GraphExecutor {
    #[must_use]
    pub fn new(
        registry: NodeRegistry,
        checkpointer: Arc<dyn Checkpointer>,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_router(registry, checkpointer, config, route)
    }

    /// Like [`GraphExecutor::new`] but with a custom routing function.
    #[must_use]
    pub fn with_router(
        registry: NodeRegistry,
        checkpointer: Arc<dyn Checkpointer>,
        config: RuntimeConfig,
        router: RouterFn,
    ) -> Self {
        Self {
            registry,
            checkpointer,
            config,
            router,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Execute the run starting at `entry` until completion, suspension,
    /// or failure.
    #[instrument(
        skip(self, state),
        fields(conversation = %state.conversation_id, turn = %state.turn_id),
        err
    )]
    pub async fn run(
        &self,
        mut state: ConversationState,
        entry: NodeId,
    ) -> Result<RunReport, ExecutorError> {
        let mut current = entry;
        let mut trace: Vec<NodeId> = Vec::new();
        let mut step: u32 = 0;

        loop {
            if step >= self.config.step_budget {
                let failure = RunFailure::RoutingCycle {
                    budget: self.config.step_budget,
                    trace: trace.clone(),
                };
                tracing::error!(budget = self.config.step_budget, trace = ?trace, "step budget exceeded");
                state.run_status = RunStatus::Failed;
                self.save_best_effort(&state, step, current).await;
                return Ok(RunReport {
                    state,
                    steps: step,
                    trace,
                    outcome: RunOutcome::Failed(failure),
                });
            }
            step += 1;

            // Durable checkpoint before the node runs; this is the crash
            // recovery point.
            self.checkpointer
                .save(Checkpoint::capture(&state, step, current))
                .await?;

            let node = self
                .registry
                .resolve(current)
                .ok_or(ExecutorError::UnknownNode { node: current })?;
            let ctx = NodeContext {
                node: current,
                step,
            };
            trace.push(current);
            tracing::debug!(node = %current, step, "executing node");

            let merge_result = match node.run(&state, ctx).await {
                Ok(delta) => delta.apply(&mut state).and_then(|()| state.check_invariants()),
                Err(err) => {
                    return Ok(self.fail_node(state, step, current, trace, err.to_string()).await);
                }
            };
            if let Err(err) = merge_result {
                return Ok(self.fail_node(state, step, current, trace, err.to_string()).await);
            }

            if state.run_status == RunStatus::Suspended {
                // Suspension must be durable before control returns.
                self.checkpointer
                    .save(Checkpoint::capture(&state, step, current))
                    .await?;
                tracing::info!(node = %current, step, "run suspended awaiting decision");
                return Ok(RunReport {
                    state,
                    steps: step,
                    trace,
                    outcome: RunOutcome::Suspended,
                });
            }

            match (self.router)(current, &state) {
                Next::End => {
                    state.run_status = RunStatus::Completed;
                    self.save_best_effort(&state, step, current).await;
                    tracing::info!(steps = step, "run completed");
                    return Ok(RunReport {
                        state,
                        steps: step,
                        trace,
                        outcome: RunOutcome::Completed,
                    });
                }
                Next::Node(next) => current = next,
            }
        }
    }

    async fn fail_node(
        &self,
        mut state: ConversationState,
        step: u32,
        node: NodeId,
        trace: Vec<NodeId>,
        message: String,
    ) -> RunReport {
        tracing::error!(node = %node, step, error = %message, "node fault; failing run");
        state.run_status = RunStatus::Failed;
        self.save_best_effort(&state, step, node).await;
        RunReport {
            state,
            steps: step,
            trace,
            outcome: RunOutcome::Failed(RunFailure::Node { node, message }),
        }
    }

    /// Terminal snapshots are recorded best-effort; the last pre-node
    /// checkpoint already guarantees recoverability.
    async fn save_best_effort(&self, state: &ConversationState, step: u32, node: NodeId) {
        if let Err(err) = self
            .checkpointer
            .save(Checkpoint::capture(state, step, node))
            .await
        {
            tracing::warn!(error = %err, "terminal checkpoint save failed");
        }
    }
}
