//! Salience explainer.
//!
//! Scores each word by occlusion: the word (or a window of words) is
//! removed, the text is classified again, and the drop in the predicted
//! class's probability is its contribution. Scores are ranked by
//! [`recast_core::salience`].
//!
//! One explanation costs up to `max_positions + 1` predictions, so the
//! orchestrator only builds an explainer over a chunk model, never over a
//! judge agent.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::classifier::{ClassifierError, ClassifierOracle};
use recast_core::salience::{
    rank_phrases, rank_tokens, Explanation, DEFAULT_PHRASE_THRESHOLD, DEFAULT_TOP_PHRASES,
    DEFAULT_TOP_TOKENS,
};

/// Explainer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    pub top_tokens: usize,
    pub top_phrases: usize,
    pub phrase_threshold: f64,
    /// Words removed together per occlusion.
    pub mask_window: usize,
    /// Only the first `max_positions` words are occluded.
    pub max_positions: usize,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            top_tokens: DEFAULT_TOP_TOKENS,
            top_phrases: DEFAULT_TOP_PHRASES,
            phrase_threshold: DEFAULT_PHRASE_THRESHOLD,
            mask_window: 1,
            max_positions: 400,
        }
    }
}

pub struct Explainer {
    oracle: Arc<dyn ClassifierOracle>,
    config: ExplainerConfig,
}

impl Explainer {
    pub fn new(oracle: Arc<dyn ClassifierOracle>) -> Self {
        Self {
            oracle,
            config: ExplainerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExplainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-word contributions toward the class predicted for `text`.
    pub async fn attribute(&self, text: &str) -> Result<Vec<(String, f64)>, ClassifierError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let base = self.oracle.predict(text).await?;
        let label = base.label;
        let base_p = base.probabilities.get(label);

        let window = self.config.mask_window.max(1);
        let positions = words.len().min(self.config.max_positions);
        let mut scored: Vec<(String, f64)> = words.iter().map(|w| (w.to_string(), 0.0)).collect();

        for start in (0..positions).step_by(window) {
            let end = (start + window).min(words.len());
            let masked = words[..start]
                .iter()
                .chain(words[end..].iter())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");

            let p = self.oracle.predict(&masked).await?.probabilities.get(label);
            let share = (base_p - p) / (end - start) as f64;
            for entry in &mut scored[start..end] {
                entry.1 = share;
            }
        }

        tracing::debug!(
            oracle = self.oracle.name(),
            words = words.len(),
            occluded = positions,
            %label,
            "attribution computed"
        );
        Ok(scored)
    }

    /// Top tokens and phrases driving the current verdict.
    pub async fn explain(&self, text: &str) -> Result<Explanation, ClassifierError> {
        let scored = self.attribute(text).await?;
        Ok(Explanation {
            tokens: rank_tokens(&scored, self.config.top_tokens),
            phrases: rank_phrases(
                &scored,
                self.config.phrase_threshold,
                self.config.top_phrases,
            ),
        })
    }
}
