//! Runtime configuration.
//!
//! Tuning values the original operators exposed (step budget, few-shot
//! counts) stay configurable rather than hard-coded; they are soft safety
//! margins, not semantics. Defaults can be overridden through environment
//! variables (a `.env` file is honored via dotenvy).

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration shared by the executor, the nodes, and the service.
///
/// Built once at startup and cloned into the immutable workflow; never
/// mutated during execution.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum node executions per run before the cycle guard fails the
    /// run. A soft safety margin against routing bugs.
    pub step_budget: u32,
    /// How many history messages to load into a turn.
    pub history_window: usize,
    /// Few-shot examples injected into classification prompts.
    pub classify_examples: usize,
    /// Few-shot examples injected into generation prompts.
    pub respond_examples: usize,
    /// Passages requested from the retrieval collaborator.
    pub retrieval_k: usize,
    /// Summarize once the turn's history reaches this many messages...
    pub summarize_after_messages: usize,
    /// ...or this much accumulated content.
    pub summarize_after_chars: usize,
    /// Retry policy handed to external-read nodes.
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            step_budget: 25,
            history_window: 10,
            classify_examples: 5,
            respond_examples: 3,
            retrieval_k: 4,
            summarize_after_messages: 6,
            summarize_after_chars: 2000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `CHATLOOM_*` environment variables.
    ///
    /// Recognized: `CHATLOOM_STEP_BUDGET`, `CHATLOOM_HISTORY_WINDOW`,
    /// `CHATLOOM_CLASSIFY_EXAMPLES`, `CHATLOOM_RESPOND_EXAMPLES`,
    /// `CHATLOOM_RETRIEVAL_K`, `CHATLOOM_RETRY_ATTEMPTS`,
    /// `CHATLOOM_RETRY_BASE_MS`. Unparseable values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(v) = env_parse("CHATLOOM_STEP_BUDGET") {
            config.step_budget = v;
        }
        if let Some(v) = env_parse("CHATLOOM_HISTORY_WINDOW") {
            config.history_window = v;
        }
        if let Some(v) = env_parse("CHATLOOM_CLASSIFY_EXAMPLES") {
            config.classify_examples = v;
        }
        if let Some(v) = env_parse("CHATLOOM_RESPOND_EXAMPLES") {
            config.respond_examples = v;
        }
        if let Some(v) = env_parse("CHATLOOM_RETRIEVAL_K") {
            config.retrieval_k = v;
        }
        if let Some(v) = env_parse::<u32>("CHATLOOM_RETRY_ATTEMPTS") {
            config.retry.max_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("CHATLOOM_RETRY_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(v);
        }
        config
    }

    #[must_use]
    pub fn with_step_budget(mut self, step_budget: u32) -> Self {
        self.step_budget = step_budget;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.parse().ok())
}
