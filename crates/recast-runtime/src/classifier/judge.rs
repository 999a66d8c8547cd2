//! Oracle backed by a generation agent acting as a judge.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ClassifierError, ClassifierOracle};
use crate::agents::GenerationAgent;
use recast_core::{ProbabilityPair, Verdict};

/// Placeholder replaced by the text under judgement.
pub const TEXT_PLACEHOLDER: &str = "{{text}}";

const DEFAULT_PROMPT: &str = "Decide whether the following news article is REAL or FAKE. \
Answer with exactly one word: REAL or FAKE.\n\nArticle:\n{{text}}";

/// Asks a judge agent for a one-word verdict.
///
/// A reply mentioning "fake" or "manufactured" maps to `(0.1, 0.9)`, any
/// other reply to `(0.9, 0.1)`.
pub struct AgentJudgeOracle {
    agent: Arc<dyn GenerationAgent>,
    prompt: String,
}

impl AgentJudgeOracle {
    pub fn new(agent: Arc<dyn GenerationAgent>) -> Self {
        Self {
            agent,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    /// Custom prompt; must contain `{{text}}`.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    fn interpret(reply: &str) -> ProbabilityPair {
        let reply = reply.to_lowercase();
        if reply.contains("fake") || reply.contains("manufactured") {
            ProbabilityPair::new(0.1, 0.9)
        } else {
            ProbabilityPair::new(0.9, 0.1)
        }
    }
}

#[async_trait]
impl ClassifierOracle for AgentJudgeOracle {
    async fn predict(&self, text: &str) -> Result<Verdict, ClassifierError> {
        if text.trim().is_empty() {
            return Ok(Verdict::from_probabilities(ProbabilityPair::neutral()));
        }
        let prompt = self.prompt.replace(TEXT_PLACEHOLDER, text);
        let reply = self.agent.issue(&prompt).await?;
        Ok(Verdict::from_probabilities(Self::interpret(&reply)))
    }

    fn name(&self) -> &str {
        "agent_judge"
    }
}
