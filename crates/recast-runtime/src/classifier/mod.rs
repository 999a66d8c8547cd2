//! Classifier oracle backends.
//!
//! The oracle is the round loop's termination condition: a text either
//! passes as [`Label::Authentic`] or is flagged [`Label::Manufactured`].
//!
//! - [`ChunkedOracle`] wraps a pretrained [`ChunkModel`] with
//!   non-overlapping chunking and probability averaging
//! - [`AgentJudgeOracle`] asks a generation agent for a one-word verdict
//!
//! [`Label::Authentic`]: recast_core::Label::Authentic
//! [`Label::Manufactured`]: recast_core::Label::Manufactured

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::agents::AgentError;
use recast_core::{ProbabilityPair, Verdict};

mod chunked;
mod judge;
#[cfg(feature = "remote-classifier")]
mod remote;

pub use chunked::ChunkedOracle;
pub use judge::AgentJudgeOracle;
#[cfg(feature = "remote-classifier")]
pub use remote::RemoteChunkModel;

/// Errors from classifier backends.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Judge agent failed: {0}")]
    Agent(#[from] AgentError),
}

/// Maps a text to a verdict.
#[async_trait]
pub trait ClassifierOracle: Send + Sync {
    async fn predict(&self, text: &str) -> Result<Verdict, ClassifierError>;

    /// Backend name for logs and records.
    fn name(&self) -> &str;
}

/// A pretrained two-class model with a bounded context.
#[async_trait]
pub trait ChunkModel: Send + Sync {
    /// Model identity, used as part of the prediction cache key.
    fn name(&self) -> &str;

    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Inverse of [`tokenize`](Self::tokenize) for one chunk.
    fn detokenize(&self, tokens: &[String]) -> String {
        tokens.join(" ")
    }

    /// Largest chunk the model accepts, in tokens.
    fn max_chunk_tokens(&self) -> usize;

    /// One probability pair per chunk, in order.
    async fn score_chunks(&self, chunks: &[String]) -> Result<Vec<ProbabilityPair>, ClassifierError>;
}

/// Puts a time limit on every prediction of the wrapped oracle.
pub struct TimedOracle {
    inner: std::sync::Arc<dyn ClassifierOracle>,
    timeout: Duration,
}

impl TimedOracle {
    pub fn new(inner: std::sync::Arc<dyn ClassifierOracle>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ClassifierOracle for TimedOracle {
    async fn predict(&self, text: &str) -> Result<Verdict, ClassifierError> {
        match tokio::time::timeout(self.timeout, self.inner.predict(text)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    oracle = self.inner.name(),
                    timeout = ?self.timeout,
                    "prediction timed out"
                );
                Err(ClassifierError::Timeout(self.timeout))
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
