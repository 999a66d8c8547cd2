//! Per-round and per-document state.

use recast_core::{Document, Stage, StageTimings, Verdict};

/// Working state of one round.
///
/// Passed by value into each stage and returned with that stage's
/// changes applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundState {
    /// 1-based round number.
    pub round: usize,
    pub stage: Stage,
    pub text: String,
    pub sentence_to_modify: String,
    pub modified_sentence: String,
    /// Detection feedback. Holds the previous round's until a stage
    /// consumes it, then this round's if the text was flagged again.
    pub feedback: Option<String>,
    /// Critique waiting for a retry sub-step.
    pub critique: Option<String>,
    pub verdict: Option<Verdict>,
}

impl RoundState {
    pub fn new(round: usize, stage: Stage, text: impl Into<String>, feedback: Option<String>) -> Self {
        Self {
            round,
            stage,
            text: text.into(),
            sentence_to_modify: String::new(),
            modified_sentence: String::new(),
            feedback: feedback.filter(|f| !f.trim().is_empty()),
            critique: None,
            verdict: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Store a critique; blank ones are dropped.
    pub fn with_critique(mut self, critique: impl Into<String>) -> Self {
        let critique = critique.into();
        self.critique = if critique.trim().is_empty() {
            None
        } else {
            Some(critique)
        };
        self
    }

    pub fn is_flagged(&self) -> bool {
        self.verdict.is_some_and(|v| !v.is_authentic())
    }
}

/// A document being worked on.
#[derive(Debug)]
pub struct DocumentRun {
    pub document: Document,
    pub timings: StageTimings,
    /// External calls made, retries included.
    pub calls: usize,
}

impl DocumentRun {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            timings: StageTimings::new(),
            calls: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_core::ProbabilityPair;

    #[test]
    fn test_blank_feedback_is_dropped() {
        let state = RoundState::new(2, Stage::SeedRevision, "t", Some("  ".to_string()));
        assert!(state.feedback.is_none());

        let state = state.with_critique("").with_critique("  \n");
        assert!(state.critique.is_none());
        assert_eq!(state.with_critique("shorter").critique.as_deref(), Some("shorter"));
    }

    #[test]
    fn test_flagged_needs_a_manufactured_verdict() {
        let mut state = RoundState::new(1, Stage::Classify, "t", None);
        assert!(!state.is_flagged());
        state.verdict = Some(Verdict::from_probabilities(ProbabilityPair::new(0.3, 0.7)));
        assert!(state.is_flagged());
        state.verdict = Some(Verdict::from_probabilities(ProbabilityPair::new(0.7, 0.3)));
        assert!(!state.is_flagged());
    }
}
