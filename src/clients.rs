//! External collaborator seams: model inference and vector retrieval.
//!
//! The workflow core never talks to a concrete provider; nodes hold these
//! trait objects and a [`RetryPolicy`](crate::retry::RetryPolicy) for the
//! transient failures providers are allowed to have.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::state::ScoredPassage;

/// Errors from an external collaborator call.
#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    /// The provider is temporarily unavailable; eligible for retry with
    /// backoff at the node boundary.
    #[error("{provider} temporarily unavailable: {message}")]
    #[diagnostic(
        code(chatloom::clients::transient_unavailable),
        help("Retried automatically per the node's retry policy; persistent outages fail the run.")
    )]
    TransientUnavailable {
        provider: &'static str,
        message: String,
    },

    /// A non-retriable provider failure.
    #[error("{provider} request failed: {message}")]
    #[diagnostic(code(chatloom::clients::failed))]
    Failed {
        provider: &'static str,
        message: String,
    },
}

impl ClientError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::TransientUnavailable { .. })
    }
}

/// Language-model inference collaborator.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String, ClientError>;
}

/// Vector-similarity retrieval collaborator.
///
/// An empty index is not an error: implementations return an empty
/// sequence when nothing relevant exists.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Return up to `k` passages ordered by descending relevance.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, ClientError>;
}
