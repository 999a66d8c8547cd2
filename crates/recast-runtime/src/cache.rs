//! Prediction cache for classifier oracles.
//!
//! Rounds and the explainer often classify the same text more than once
//! (the unchanged baseline, a round that produced no edit). Predictions
//! are keyed by the exact text.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use recast_core::ProbabilityPair;

/// Cache key: model identity plus a hash of the exact text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PredictionKey {
    model_hash: u64,
    text_hash: u64,
}

impl PredictionKey {
    pub fn new(model: &str, text: &str) -> Self {
        Self {
            model_hash: hash_str(model),
            text_hash: hash_str(text),
        }
    }
}

fn hash_str(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Probability pairs by text, backed by moka.
pub struct PredictionCache {
    cache: Cache<PredictionKey, ProbabilityPair>,
}

impl PredictionCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &PredictionKey) -> Option<ProbabilityPair> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: PredictionKey, pair: ProbabilityPair) {
        self.cache.insert(key, pair).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for PredictionCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for PredictionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionCache")
            .field("entries", &self.entry_count())
            .finish()
    }
}
