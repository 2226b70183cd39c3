//! Explicit retry policy for external-read nodes.
//!
//! Retry behavior is a value handed to each node that performs external
//! reads, not ambient machinery: the policy states its attempt budget and
//! backoff schedule, and only transient errors are retried.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clients::ClientError;

/// Bounded-attempt exponential backoff.
///
/// Attempt `n` (1-based) sleeps `base_delay * multiplier^(n-1)` before
/// retrying, capped at [`RetryPolicy::MAX_DELAY`]. Non-transient errors
/// are returned immediately.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub const MAX_DELAY: Duration = Duration::from_secs(10);

    /// A policy that never retries; useful in tests and for callers that
    /// want failures surfaced immediately.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(Self::MAX_DELAY)
    }

    /// Run `op`, retrying transient failures up to `max_attempts` total
    /// attempts with backoff between them.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient collaborator failure, backing off"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
