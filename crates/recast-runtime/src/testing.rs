//! Scripted collaborators for tests.
//!
//! In-memory stand-ins for generation agents, classifier oracles and
//! chunk models. Compiled for the unit tests of this crate and behind the
//! `testing` feature, which the integration tests under `tests/` enable.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::agents::{AgentError, AgentRole, GenerationAgent};
use crate::classifier::{ChunkModel, ClassifierError, ClassifierOracle};
use recast_core::{ProbabilityPair, Verdict};

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Agent that replays queued responses.
///
/// When the queue is empty it answers through the responder, if any, and
/// fails otherwise. Every prompt (issued or re-issued) is recorded.
pub struct ScriptedAgent {
    role: AgentRole,
    responses: Mutex<VecDeque<String>>,
    responder: Option<Responder>,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(role: AgentRole, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role,
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            responder: None,
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Agent whose every call fails as if the backend were down.
    pub fn failing(role: AgentRole) -> Self {
        Self {
            fail: true,
            ..Self::new(role, Vec::<String>::new())
        }
    }

    /// Answer every call the queue cannot with `response`.
    pub fn with_default(self, response: impl Into<String>) -> Self {
        let response = response.into();
        self.with_responder(move |_| response.clone())
    }

    /// Answer every call the queue cannot with `f(prompt)`.
    pub fn with_responder(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    fn answer(&self, prompt: &str) -> Result<String, AgentError> {
        self.prompts.lock().push(prompt.to_string());
        if self.fail {
            return Err(AgentError::Internal(format!("{} backend unavailable", self.role)));
        }
        if let Some(response) = self.responses.lock().pop_front() {
            return Ok(response);
        }
        match &self.responder {
            Some(f) => Ok(f(prompt)),
            None => Err(AgentError::Internal(format!("{} script exhausted", self.role))),
        }
    }
}

#[async_trait]
impl GenerationAgent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn issue(&self, prompt: &str) -> Result<String, AgentError> {
        self.answer(prompt)
    }

    async fn reissue(&self, correction: &str) -> Result<String, AgentError> {
        self.answer(correction)
    }
}

/// Oracle that returns scripted probability pairs in order, repeating the
/// last one once the script runs out.
pub struct FixedOracle {
    pairs: Mutex<VecDeque<ProbabilityPair>>,
    last: Mutex<ProbabilityPair>,
    fail: bool,
    texts: Mutex<Vec<String>>,
}

impl FixedOracle {
    pub fn new(pairs: impl IntoIterator<Item = ProbabilityPair>) -> Self {
        Self {
            pairs: Mutex::new(pairs.into_iter().collect()),
            last: Mutex::new(ProbabilityPair::new(0.2, 0.8)),
            fail: false,
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Always flags the text.
    pub fn manufactured() -> Self {
        Self::new([ProbabilityPair::new(0.2, 0.8)])
    }

    /// Always lets the text pass.
    pub fn authentic() -> Self {
        Self::new([ProbabilityPair::new(0.8, 0.2)])
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Texts classified so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.texts.lock().len()
    }
}

#[async_trait]
impl ClassifierOracle for FixedOracle {
    async fn predict(&self, text: &str) -> Result<Verdict, ClassifierError> {
        self.texts.lock().push(text.to_string());
        if self.fail {
            return Err(ClassifierError::Unavailable("scripted outage".to_string()));
        }
        let mut last = self.last.lock();
        if let Some(pair) = self.pairs.lock().pop_front() {
            *last = pair;
        }
        Ok(Verdict::from_probabilities(*last))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Whitespace-token chunk model.
///
/// Scores come from the script when one is given (in order across calls,
/// last one repeated). Otherwise a chunk's manufactured probability grows
/// with the share of trigger words in it: `min(0.3 + 2.1 * share, 0.95)`.
pub struct ScriptedModel {
    max_chunk_tokens: usize,
    script: Mutex<VecDeque<ProbabilityPair>>,
    last: Mutex<Option<ProbabilityPair>>,
    triggers: HashSet<String>,
    truncate: bool,
    scored: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(max_chunk_tokens: usize) -> Self {
        Self {
            max_chunk_tokens,
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            triggers: HashSet::new(),
            truncate: false,
            scored: AtomicUsize::new(0),
        }
    }

    pub fn with_chunk_scores(self, scores: Vec<ProbabilityPair>) -> Self {
        *self.script.lock() = scores.into();
        self
    }

    pub fn with_triggers<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = words.into_iter().map(|w| w.into().to_lowercase()).collect();
        self
    }

    /// Return a single score no matter how many chunks were sent.
    pub fn truncating(mut self) -> Self {
        self.truncate = true;
        self
    }

    /// Chunks scored so far.
    pub fn chunks_scored(&self) -> usize {
        self.scored.load(Ordering::SeqCst)
    }

    fn score(&self, chunk: &str) -> ProbabilityPair {
        if let Some(pair) = self.script.lock().pop_front() {
            *self.last.lock() = Some(pair);
            return pair;
        }
        if let Some(pair) = *self.last.lock() {
            return pair;
        }

        let words: Vec<String> = chunk
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
            })
            .collect();
        if words.is_empty() {
            return ProbabilityPair::neutral();
        }
        let hits = words.iter().filter(|w| self.triggers.contains(*w)).count();
        let share = hits as f64 / words.len() as f64;
        let manufactured = (0.3 + 2.1 * share).min(0.95);
        ProbabilityPair::new(1.0 - manufactured, manufactured)
    }
}

#[async_trait]
impl ChunkModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    async fn score_chunks(&self, chunks: &[String]) -> Result<Vec<ProbabilityPair>, ClassifierError> {
        self.scored.fetch_add(chunks.len(), Ordering::SeqCst);
        let mut pairs: Vec<ProbabilityPair> = chunks.iter().map(|c| self.score(c)).collect();
        if self.truncate {
            pairs.truncate(1);
        }
        Ok(pairs)
    }
}
