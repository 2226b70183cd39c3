//! Shared test doubles and wiring helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use chatloom::clients::{ClientError, ModelClient, RetrievalClient};
use chatloom::fewshot::{CuratedExample, ExampleBank, Quality};
use chatloom::retry::RetryPolicy;
use chatloom::runtime::{InMemoryCheckpointer, RuntimeConfig};
use chatloom::service::AgentService;
use chatloom::state::{Intent, ScoredPassage, UserProfile};
use chatloom::storage::{InMemoryStorage, Storage};

/// Deterministic model double. Recognizes the classification and
/// summarization prompts by their fixed preambles; everything else gets
/// the configured reply.
pub struct StubModel {
    pub reply: String,
}

impl StubModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for StubModel {
    async fn generate(&self, prompt: &str) -> Result<String, ClientError> {
        if prompt.contains("intent classifier") {
            Ok("SUPPORT".to_string())
        } else if prompt.contains("memory profile") {
            Ok("The user asked about support topics.".to_string())
        } else {
            Ok(self.reply.clone())
        }
    }
}

/// Fails transiently a fixed number of times, then behaves like
/// [`StubModel`].
pub struct FlakyModel {
    failures_left: AtomicU32,
    inner: StubModel,
}

impl FlakyModel {
    pub fn new(failures: u32, reply: &str) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            inner: StubModel::new(reply),
        }
    }
}

#[async_trait]
impl ModelClient for FlakyModel {
    async fn generate(&self, prompt: &str) -> Result<String, ClientError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ClientError::TransientUnavailable {
                provider: "model",
                message: "overloaded".to_string(),
            });
        }
        self.inner.generate(prompt).await
    }
}

/// Always transiently unavailable.
pub struct DownModel;

#[async_trait]
impl ModelClient for DownModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ClientError> {
        Err(ClientError::TransientUnavailable {
            provider: "model",
            message: "connection refused".to_string(),
        })
    }
}

/// Serves a fixed set of passages.
pub struct StaticRetrieval(pub Vec<ScoredPassage>);

#[async_trait]
impl RetrievalClient for StaticRetrieval {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<ScoredPassage>, ClientError> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
}

/// An index with nothing in it.
pub struct EmptyRetrieval;

#[async_trait]
impl RetrievalClient for EmptyRetrieval {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredPassage>, ClientError> {
        Ok(Vec::new())
    }
}

/// Retry without sleeps so tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        multiplier: 1.0,
    }
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig::default().with_retry(fast_retry(3))
}

pub fn example_bank() -> ExampleBank {
    ExampleBank::with_examples(vec![
        CuratedExample::labeled("I want a refund", Intent::Complaint, Quality::Gold),
        CuratedExample::labeled("how much is the pro plan", Intent::Sales, Quality::Gold),
        CuratedExample::answered(
            "what are your opening hours",
            Intent::Support,
            "We are open 9am to 6pm on weekdays.",
            Quality::Gold,
        ),
    ])
}

/// Fully wired in-memory service plus handles on its backends.
pub struct TestHarness {
    pub service: Arc<AgentService>,
    pub storage: Arc<InMemoryStorage>,
    pub checkpointer: Arc<InMemoryCheckpointer>,
}

pub fn harness_with(model: Arc<dyn ModelClient>, config: RuntimeConfig) -> TestHarness {
    let storage = Arc::new(InMemoryStorage::new());
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let service = Arc::new(AgentService::new(
        storage.clone(),
        checkpointer.clone(),
        model,
        Arc::new(EmptyRetrieval),
        Arc::new(example_bank()),
        config,
    ));
    TestHarness {
        service,
        storage,
        checkpointer,
    }
}

pub fn harness(reply: &str) -> TestHarness {
    harness_with(Arc::new(StubModel::new(reply)), test_config())
}

/// Seed a profile so the turn is not treated as first contact.
pub async fn seed_profile(storage: &InMemoryStorage, user: &str, name: &str) {
    storage
        .upsert_profile(
            user,
            &UserProfile {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("seed profile");
}
