//! Chunked inference over arbitrarily long text.

use async_trait::async_trait;

use super::{ChunkModel, ClassifierError, ClassifierOracle};
use crate::cache::{PredictionCache, PredictionKey};
use recast_core::chunking::{average_pairs, chunk_tokens};
use recast_core::{ProbabilityPair, Verdict};

/// Oracle that splits text into model-sized chunks, scores each and
/// averages the pairs.
///
/// Empty or whitespace-only text is neutral and never reaches the model.
pub struct ChunkedOracle<M> {
    model: M,
    cache: Option<PredictionCache>,
}

impl<M: ChunkModel> ChunkedOracle<M> {
    pub fn new(model: M) -> Self {
        Self { model, cache: None }
    }

    pub fn with_cache(mut self, cache: PredictionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Averaged probabilities for `text`.
    pub async fn probabilities(&self, text: &str) -> Result<ProbabilityPair, ClassifierError> {
        if text.trim().is_empty() {
            return Ok(ProbabilityPair::neutral());
        }

        let key = PredictionKey::new(self.model.name(), text);
        if let Some(cache) = &self.cache {
            if let Some(pair) = cache.get(&key).await {
                return Ok(pair);
            }
        }

        let tokens = self.model.tokenize(text);
        let chunks: Vec<String> = chunk_tokens(&tokens, self.model.max_chunk_tokens())
            .iter()
            .map(|chunk| self.model.detokenize(chunk))
            .collect();
        if chunks.is_empty() {
            return Ok(ProbabilityPair::neutral());
        }

        let pairs = self.model.score_chunks(&chunks).await?;
        if pairs.len() != chunks.len() {
            return Err(ClassifierError::InvalidResponse(format!(
                "expected {} chunk scores, got {}",
                chunks.len(),
                pairs.len()
            )));
        }

        let pair = average_pairs(&pairs);
        tracing::debug!(
            model = self.model.name(),
            chunks = chunks.len(),
            authentic = pair.authentic,
            manufactured = pair.manufactured,
            "text classified"
        );

        if let Some(cache) = &self.cache {
            cache.insert(key, pair).await;
        }
        Ok(pair)
    }
}

#[async_trait]
impl<M: ChunkModel> ClassifierOracle for ChunkedOracle<M> {
    async fn predict(&self, text: &str) -> Result<Verdict, ClassifierError> {
        Ok(Verdict::from_probabilities(self.probabilities(text).await?))
    }

    fn name(&self) -> &str {
        self.model.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use recast_core::Label;

    #[tokio::test]
    async fn test_empty_text_is_neutral_without_model_call() {
        let model = ScriptedModel::new(4);
        let oracle = ChunkedOracle::new(model);

        let verdict = oracle.predict("   \n ").await.unwrap();
        assert_eq!(verdict.probabilities, ProbabilityPair::neutral());
        assert_eq!(verdict.label, Label::Manufactured);
        assert_eq!(oracle.model().chunks_scored(), 0);
    }

    #[tokio::test]
    async fn test_three_chunks_are_averaged() {
        let model = ScriptedModel::new(2).with_chunk_scores(vec![
            ProbabilityPair::new(0.9, 0.1),
            ProbabilityPair::new(0.7, 0.3),
            ProbabilityPair::new(0.5, 0.5),
        ]);
        let oracle = ChunkedOracle::new(model);

        let verdict = oracle.predict("one two three four five six").await.unwrap();
        assert_eq!(oracle.model().chunks_scored(), 3);
        assert!((verdict.probabilities.authentic - 0.7).abs() < 1e-12);
        assert!((verdict.probabilities.manufactured - 0.3).abs() < 1e-12);
        assert_eq!(verdict.label, Label::Authentic);
    }

    #[tokio::test]
    async fn test_cache_skips_model() {
        let oracle = ChunkedOracle::new(ScriptedModel::new(8)).with_cache(PredictionCache::default());

        let first = oracle.predict("the same words").await.unwrap();
        let scored = oracle.model().chunks_scored();
        let second = oracle.predict("the same words").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(oracle.model().chunks_scored(), scored);
    }

    #[tokio::test]
    async fn test_mismatched_score_count_is_error() {
        let model = ScriptedModel::new(1).with_chunk_scores(vec![ProbabilityPair::neutral()]);
        let oracle = ChunkedOracle::new(model.truncating());
        let err = oracle.predict("a b c").await.unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }
}
