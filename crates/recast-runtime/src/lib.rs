//! # recast-runtime
//!
//! Agent-driven revision rounds against a classifier oracle.
//!
//! This crate holds every piece of the revision loop that talks to an
//! external collaborator. The deterministic pieces (schemas, the repair
//! chain, chunk averaging, salience ranking) live in `recast-core`.
//!
//! - [`agents`]: generation agents behind a single `issue(prompt)` call
//! - [`providers`]: LLM backends the agents run on
//! - [`validator`]: repair, bounded retry and fallback for agent replies
//! - [`classifier`]: oracle backends with chunked inference
//! - [`explainer`]: occlusion attribution ranked into tokens and phrases
//! - [`orchestrator`]: the round state machine and batch runner
//! - [`sink`]: result, timing and audit records
//!
//! ## Failure model
//!
//! Malformed agent output never fails a document; it ends in the schema's
//! fallback record. An unavailable agent or classifier fails the current
//! document only. [`BatchRunner`] records it and moves on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recast_runtime::{BatchRunner, JsonlSink, RoundOrchestrator, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("recast.yaml")?;
//! let orchestrator = RoundOrchestrator::builder()
//!     .config(config)
//!     .oracle(oracle.clone())
//!     .explainer_oracle(oracle)
//!     .agent(selector)
//!     // ... one agent per role
//!     .sink(Arc::new(JsonlSink::create("output")?))
//!     .build()?;
//!
//! let summary = BatchRunner::new(&orchestrator).run(documents).await?;
//! ```

use thiserror::Error;

pub mod agents;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod explainer;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod sink;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validator;

pub use agents::{AgentError, AgentRole, GenerationAgent, ProviderAgent};
pub use cache::PredictionCache;
pub use classifier::{AgentJudgeOracle, ChunkModel, ChunkedOracle, ClassifierError, ClassifierOracle};
pub use config::{ConfigError, DisableTarget, PipelineMode, RuntimeConfig, SpliceStrategy};
pub use explainer::{Explainer, ExplainerConfig};
pub use orchestrator::{BatchRunner, BatchSummary, RoundOrchestrator, RoundOrchestratorBuilder};
pub use prompts::PromptLibrary;
pub use sink::{AuditRecord, DocumentOutcome, JsonlSink, MemorySink, RecordSink, SinkError, TimingRow};
pub use validator::{ResponseValidator, ValidationReport};

/// Errors that end the processing of one document.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Round incomplete: {0}")]
    Incomplete(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::from(ClassifierError::Timeout(Duration::from_secs(2)));
        assert_eq!(err.to_string(), "Classifier error: Classifier timed out after 2s");

        let err = RuntimeError::from(AgentError::NotConfigured("critic".to_string()));
        assert_eq!(err.to_string(), "Agent error: Agent not configured: critic");
    }
}
