//! Core types for recast.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The two classes the oracle can assign to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// The document passes as authentic (the "undetected" class).
    Authentic,
    /// The document is flagged as manufactured (the "detected" class).
    Manufactured,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Authentic => write!(f, "Authentic"),
            Label::Manufactured => write!(f, "Manufactured"),
        }
    }
}

/// Two-class probability vector, in `[authentic, manufactured]` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityPair {
    pub authentic: f64,
    pub manufactured: f64,
}

impl ProbabilityPair {
    pub fn new(authentic: f64, manufactured: f64) -> Self {
        Self {
            authentic,
            manufactured,
        }
    }

    /// The 50/50 pair used when there is nothing to classify.
    pub fn neutral() -> Self {
        Self::new(0.5, 0.5)
    }

    /// Winning class. Ties resolve to `Manufactured`.
    pub fn label(&self) -> Label {
        if self.authentic > self.manufactured {
            Label::Authentic
        } else {
            Label::Manufactured
        }
    }

    /// Probability assigned to a class.
    pub fn get(&self, label: Label) -> f64 {
        match label {
            Label::Authentic => self.authentic,
            Label::Manufactured => self.manufactured,
        }
    }
}

/// Oracle decision for one text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    pub probabilities: ProbabilityPair,
}

impl Verdict {
    /// Build a verdict whose label is derived from the probabilities.
    pub fn from_probabilities(probabilities: ProbabilityPair) -> Self {
        Self {
            label: probabilities.label(),
            probabilities,
        }
    }

    pub fn is_authentic(&self) -> bool {
        self.label == Label::Authentic
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (manufactured: {:.4}, authentic: {:.4})",
            self.label, self.probabilities.manufactured, self.probabilities.authentic
        )
    }
}

/// One targeted feedback message from the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub agent: String,
    pub message: String,
}

impl FeedbackRecord {
    /// Sentinel agent name for feedback with no recognizable target.
    pub const UNKNOWN_AGENT: &'static str = "Unknown";

    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN_AGENT, message)
    }
}

/// Named steps of a revision round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SeedRevision,
    SentenceSelect,
    SentenceRewrite,
    FeedbackOnSentence,
    SentenceRewriteRetry,
    TextSplice,
    StyleTransform,
    NumericRewrite,
    NumericConsistencyFeedback,
    NumericRewriteRetry,
    UniversalRewrite,
    Evaluation,
    Classify,
    DetectionFeedback,
    Title,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::SeedRevision => "seed_revision",
            Stage::SentenceSelect => "sentence_select",
            Stage::SentenceRewrite => "sentence_rewrite",
            Stage::FeedbackOnSentence => "feedback_on_sentence",
            Stage::SentenceRewriteRetry => "sentence_rewrite_retry",
            Stage::TextSplice => "text_splice",
            Stage::StyleTransform => "style_transform",
            Stage::NumericRewrite => "numeric_rewrite",
            Stage::NumericConsistencyFeedback => "numeric_consistency_feedback",
            Stage::NumericRewriteRetry => "numeric_rewrite_retry",
            Stage::UniversalRewrite => "universal_rewrite",
            Stage::Evaluation => "evaluation",
            Stage::Classify => "classify",
            Stage::DetectionFeedback => "detection_feedback",
            Stage::Title => "title",
        }
    }
}

impl Stage {
    /// The stage that follows within a round.
    ///
    /// Optional sub-steps are part of the order; the orchestrator skips
    /// the ones that do not apply. `Title` runs once after the last round
    /// and has no successor.
    pub fn next(self) -> Option<Stage> {
        let next = match self {
            Stage::SeedRevision => Stage::SentenceSelect,
            Stage::SentenceSelect => Stage::SentenceRewrite,
            Stage::SentenceRewrite => Stage::FeedbackOnSentence,
            Stage::FeedbackOnSentence => Stage::SentenceRewriteRetry,
            Stage::SentenceRewriteRetry => Stage::TextSplice,
            Stage::TextSplice => Stage::StyleTransform,
            Stage::StyleTransform => Stage::NumericRewrite,
            Stage::NumericRewrite => Stage::NumericConsistencyFeedback,
            Stage::NumericConsistencyFeedback => Stage::NumericRewriteRetry,
            Stage::NumericRewriteRetry => Stage::Evaluation,
            Stage::UniversalRewrite => Stage::Evaluation,
            Stage::Evaluation => Stage::Classify,
            Stage::Classify => Stage::DetectionFeedback,
            Stage::DetectionFeedback | Stage::Title => return None,
        };
        Some(next)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cumulative elapsed time per stage. Purely observational.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTimings {
    elapsed: BTreeMap<Stage, Duration>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `elapsed` to the running total for `stage`.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        *self.elapsed.entry(stage).or_default() += elapsed;
    }

    pub fn get(&self, stage: Stage) -> Duration {
        self.elapsed.get(&stage).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.elapsed.values().sum()
    }

    /// Seconds per stage name, for persisted timing rows.
    pub fn as_seconds(&self) -> BTreeMap<String, f64> {
        self.elapsed
            .iter()
            .map(|(stage, d)| (stage.name().to_string(), d.as_secs_f64()))
            .collect()
    }
}

/// Overlap scores between original and revised text.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OverlapScores {
    pub rouge1: f64,
    pub rouge2: f64,
    pub rouge_l: f64,
}

/// Text-quality metrics comparing the original and the current text.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TextMetrics {
    pub similarity_score: f64,
    pub overlap_scores: OverlapScores,
    pub readability_score: f64,
    pub semantic_similarity_score: f64,
}

/// State recorded at the end of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub text: String,
    pub verdict: Verdict,
    /// Detection feedback carried into the next round, if any.
    pub feedback: Option<String>,
}

/// A document under revision.
///
/// Created once per input record; `current_text` is mutated by each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub original_title: String,
    pub original_text: String,
    pub current_text: String,
    /// Rounds finished so far.
    pub round_index: usize,
    pub history: Vec<RoundRecord>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            original_title: title.into(),
            current_text: text.clone(),
            original_text: text,
            round_index: 0,
            history: Vec::new(),
        }
    }

    /// Close the current round. Rounds are numbered from 1, so after the
    /// call `round_index` is the number of the round just recorded.
    pub fn finish_round(&mut self, verdict: Verdict, feedback: Option<String>) {
        self.round_index += 1;
        self.history.push(RoundRecord {
            round: self.round_index,
            text: self.current_text.clone(),
            verdict,
            feedback,
        });
    }

    /// Verdict of the most recent finished round.
    pub fn last_verdict(&self) -> Option<Verdict> {
        self.history.last().map(|r| r.verdict)
    }
}
