//! Stage functions. Each takes the round state and returns it updated.

use std::time::Instant;

use super::{DocumentRun, RoundOrchestrator, RoundState};
use crate::agents::AgentRole;
use crate::config::{DisableTarget, PipelineMode, SpliceStrategy};
use crate::prompts::{render, PromptKey};
use crate::RuntimeError;
use recast_core::response::{Schema, SchemaKind};
use recast_core::{first_sentence, splice_first, Explanation, Stage};

/// Critique fallback for a rewritten sentence.
pub const SENTENCE_CRITIQUE_FALLBACK: &str = "Please revise the sentence.";
/// Critique fallback for numbers and dates.
pub const NUMERIC_CRITIQUE_FALLBACK: &str = "Please revise number consistency.";
/// Feedback fallback after a flagged classification.
pub const DETECTION_FEEDBACK_FALLBACK: &str =
    "Please revise the text based on highlighted weaknesses.";

/// Stands in for the word list when no explainer is configured.
pub const NO_ATTRIBUTION: &str = "Word-level attribution is unavailable for this text.";

fn feedback_line(feedback: Option<&str>) -> String {
    match feedback {
        Some(f) if !f.trim().is_empty() => format!("Apply this feedback: {}", f.trim()),
        _ => String::new(),
    }
}

impl RoundOrchestrator {
    /// Apply the text-level edit in `prompt` with the agent for `role`.
    /// The fallback keeps `state.text`.
    async fn rewrite_text(
        &self,
        run: &mut DocumentRun,
        state: &RoundState,
        stage: Stage,
        role: AgentRole,
        prompt: String,
    ) -> Result<String, RuntimeError> {
        let schema = Schema::modified_text(state.text.as_str());
        let report = self
            .exchange(run, state.round, stage, role, prompt, &schema)
            .await?;
        Ok(report
            .record
            .text("modified_text")
            .unwrap_or(state.text.as_str())
            .to_string())
    }

    fn revision_prompt(&self, feedback: &str, text: &str) -> String {
        self.prompts.render(
            PromptKey::SeedRevision,
            &[
                ("feedback", feedback),
                ("text", text),
                ("format", SchemaKind::ModifiedText.expected_format()),
            ],
        )
    }

    /// Apply the carried detection feedback to the whole text.
    pub(super) async fn seed_revision(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let Some(feedback) = state.feedback.take() else {
            return Ok(state);
        };
        let prompt = self.revision_prompt(&feedback, &state.text);
        let text = self
            .rewrite_text(run, &state, Stage::SeedRevision, AgentRole::StyleTransformer, prompt)
            .await?;
        Ok(state.with_text(text))
    }

    pub(super) async fn select_sentence(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        if !self.enabled(DisableTarget::SentenceSelect) {
            state.sentence_to_modify = first_sentence(&state.text);
            return Ok(state);
        }

        let prompt = self.prompts.render(
            PromptKey::SentenceSelect,
            &[
                ("text", state.text.as_str()),
                ("format", SchemaKind::KeySentences.expected_format()),
            ],
        );
        let report = self
            .exchange(
                run,
                state.round,
                Stage::SentenceSelect,
                AgentRole::SentenceSelector,
                prompt,
                &Schema::key_sentences(),
            )
            .await?;

        state.sentence_to_modify = report
            .record
            .text_list("key_sentences")
            .into_iter()
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| first_sentence(&state.text));
        Ok(state)
    }

    pub(super) async fn rewrite_sentence(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
        retry: bool,
    ) -> Result<RoundState, RuntimeError> {
        if !self.enabled(DisableTarget::SentenceRewrite) {
            state.modified_sentence = state.sentence_to_modify.clone();
            return Ok(state);
        }

        let (stage, critique) = if retry {
            (Stage::SentenceRewriteRetry, state.critique.take())
        } else {
            (Stage::SentenceRewrite, None)
        };
        let feedback = feedback_line(critique.as_deref());
        let prompt = self.prompts.render(
            PromptKey::SentenceRewrite,
            &[
                ("feedback", feedback.as_str()),
                ("sentence", state.sentence_to_modify.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::ModifiedSentence.expected_format()),
            ],
        );
        let schema = Schema::modified_sentence(state.sentence_to_modify.as_str());
        let report = self
            .exchange(run, state.round, stage, AgentRole::SentenceRewriter, prompt, &schema)
            .await?;

        state.modified_sentence = report
            .record
            .text("modified_sentence")
            .unwrap_or(state.sentence_to_modify.as_str())
            .to_string();
        Ok(state)
    }

    pub(super) async fn critique_sentence(
        &self,
        run: &mut DocumentRun,
        state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let prompt = self.prompts.render(
            PromptKey::SentenceCritique,
            &[
                ("sentence", state.sentence_to_modify.as_str()),
                ("modified_sentence", state.modified_sentence.as_str()),
                ("format", SchemaKind::Feedback.expected_format()),
            ],
        );
        let report = self
            .exchange(
                run,
                state.round,
                Stage::FeedbackOnSentence,
                AgentRole::Critic,
                prompt,
                &Schema::feedback(SENTENCE_CRITIQUE_FALLBACK),
            )
            .await?;
        let critique = report.record.text("feedback").unwrap_or_default().to_string();
        Ok(state.with_critique(critique))
    }

    pub(super) async fn splice(
        &self,
        run: &mut DocumentRun,
        state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let started = Instant::now();
        if !state.text.contains(&state.sentence_to_modify) {
            tracing::warn!(
                document = %run.id(),
                round = state.round,
                "selected sentence not found in text, splice is a no-op"
            );
        }
        let local = splice_first(&state.text, &state.sentence_to_modify, &state.modified_sentence);

        if self.pipeline().splice == SpliceStrategy::Local {
            run.timings.record(Stage::TextSplice, started.elapsed());
            return Ok(state.with_text(local));
        }

        let prompt = self.prompts.render(
            PromptKey::Splice,
            &[
                ("sentence", state.sentence_to_modify.as_str()),
                ("modified_sentence", state.modified_sentence.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::ModifiedText.expected_format()),
            ],
        );
        let schema = Schema::modified_text(local.as_str());
        let report = self
            .exchange(run, state.round, Stage::TextSplice, AgentRole::Splicer, prompt, &schema)
            .await?;
        let text = report.record.text("modified_text").unwrap_or(local.as_str()).to_string();
        Ok(state.with_text(text))
    }

    /// Pick a technique, then apply it to the text.
    pub(super) async fn transform_style(
        &self,
        run: &mut DocumentRun,
        state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        if !self.enabled(DisableTarget::StyleTransform) {
            return Ok(state);
        }

        let menu = self.prompts.technique_menu();
        let prompt = self.prompts.render(
            PromptKey::TechniqueSelect,
            &[
                ("techniques", menu.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::TechniqueChoice.expected_format()),
            ],
        );
        let report = self
            .exchange(
                run,
                state.round,
                Stage::StyleTransform,
                AgentRole::StyleTransformer,
                prompt,
                &Schema::technique_choice(),
            )
            .await?;
        let choice = report.record.integer("choice").unwrap_or(1);

        let template = match self.prompts.technique(choice) {
            Some(t) => t,
            None => {
                tracing::warn!(document = %run.id(), choice, "no such technique, using technique 1");
                match self.prompts.technique(1) {
                    Some(t) => t,
                    None => {
                        tracing::warn!(document = %run.id(), "no techniques available, text unchanged");
                        return Ok(state);
                    }
                }
            }
        };

        let prompt = render(
            template,
            &[
                ("text", state.text.as_str()),
                ("format", SchemaKind::ModifiedText.expected_format()),
            ],
        );
        let text = self
            .rewrite_text(run, &state, Stage::StyleTransform, AgentRole::StyleTransformer, prompt)
            .await?;
        Ok(state.with_text(text))
    }

    pub(super) async fn rewrite_numbers(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
        retry: bool,
    ) -> Result<RoundState, RuntimeError> {
        if !self.enabled(DisableTarget::NumericRewrite) {
            return Ok(state);
        }

        let (stage, critique) = if retry {
            (Stage::NumericRewriteRetry, state.critique.take())
        } else {
            (Stage::NumericRewrite, None)
        };
        let feedback = feedback_line(critique.as_deref());
        let prompt = self.prompts.render(
            PromptKey::NumericRewrite,
            &[
                ("feedback", feedback.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::ModifiedText.expected_format()),
            ],
        );
        let text = self
            .rewrite_text(run, &state, stage, AgentRole::NumericRewriter, prompt)
            .await?;
        Ok(state.with_text(text))
    }

    pub(super) async fn critique_numbers(
        &self,
        run: &mut DocumentRun,
        state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let prompt = self.prompts.render(
            PromptKey::NumericCritique,
            &[
                ("text", state.text.as_str()),
                ("format", SchemaKind::Feedback.expected_format()),
            ],
        );
        let report = self
            .exchange(
                run,
                state.round,
                Stage::NumericConsistencyFeedback,
                AgentRole::Critic,
                prompt,
                &Schema::feedback(NUMERIC_CRITIQUE_FALLBACK),
            )
            .await?;
        let critique = report.record.text("feedback").unwrap_or_default().to_string();
        Ok(state.with_critique(critique))
    }

    pub(super) async fn universal_rewrite(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let feedback = feedback_line(state.feedback.take().as_deref());
        let prompt = self.prompts.render(
            PromptKey::Universal,
            &[
                ("feedback", feedback.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::ModifiedText.expected_format()),
            ],
        );
        let text = self
            .rewrite_text(run, &state, Stage::UniversalRewrite, AgentRole::Universal, prompt)
            .await?;
        Ok(state.with_text(text))
    }

    fn evaluation_targets(&self) -> Vec<AgentRole> {
        match self.pipeline().mode {
            PipelineMode::Universal => vec![AgentRole::Universal],
            PipelineMode::Staged => {
                let mut targets = Vec::new();
                if self.enabled(DisableTarget::StyleTransform) {
                    targets.push(AgentRole::StyleTransformer);
                }
                if self.enabled(DisableTarget::NumericRewrite) {
                    targets.push(AgentRole::NumericRewriter);
                }
                targets
            }
        }
    }

    /// Score the revision, ask the evaluator for feedback and hand each
    /// message to the rewriter it names.
    pub(super) async fn evaluate(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let metrics = self.scorer.score(&run.document.original_text, &state.text);
        let metrics_json = serde_json::to_string_pretty(&metrics)
            .map_err(|e| RuntimeError::Incomplete(format!("metrics not serializable: {}", e)))?;
        let targets = self.evaluation_targets();
        let target_names = targets.iter().map(|r| r.name()).collect::<Vec<_>>().join(", ");

        let original = run.document.original_text.clone();
        let prompt = self.prompts.render(
            PromptKey::Evaluation,
            &[
                ("metrics", metrics_json.as_str()),
                ("targets", target_names.as_str()),
                ("original", original.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::EvaluatorFeedback.expected_format()),
            ],
        );
        let report = self
            .exchange(
                run,
                state.round,
                Stage::Evaluation,
                AgentRole::Evaluator,
                prompt,
                &Schema::evaluator_feedback(),
            )
            .await?;
        if report.exhausted {
            return Ok(state);
        }

        for item in report.record.feedback("feedback") {
            let role = match self.pipeline().mode {
                PipelineMode::Universal => Some(AgentRole::Universal),
                PipelineMode::Staged => AgentRole::from_target_name(&item.agent),
            };
            let Some(role) = role.filter(|r| targets.contains(r)) else {
                tracing::debug!(
                    document = %run.id(),
                    agent = %item.agent,
                    "feedback for an unknown or inactive agent ignored"
                );
                continue;
            };
            if item.message.trim().is_empty() {
                continue;
            }

            let prompt = self.revision_prompt(&item.message, &state.text);
            let text = self
                .rewrite_text(run, &state, Stage::Evaluation, role, prompt)
                .await?;
            state = state.with_text(text);
        }
        Ok(state)
    }

    /// Explain a flagged verdict and turn it into feedback for the next round.
    pub(super) async fn detection_feedback(
        &self,
        run: &mut DocumentRun,
        mut state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        let explanation = match &self.explainer {
            Some(explainer) => {
                let started = Instant::now();
                let explanation = explainer.explain(&state.text).await?;
                run.timings.record(Stage::DetectionFeedback, started.elapsed());
                Some(explanation)
            }
            None => {
                tracing::warn!(
                    document = %run.id(),
                    round = state.round,
                    "no explainer configured; requesting feedback without attribution"
                );
                None
            }
        };

        let label = state
            .verdict
            .map(|v| v.label.to_string())
            .unwrap_or_default();
        let described = explanation
            .as_ref()
            .map(Explanation::describe)
            .unwrap_or_else(|| NO_ATTRIBUTION.to_string());
        let prompt = self.prompts.render(
            PromptKey::DetectionFeedback,
            &[
                ("label", label.as_str()),
                ("explanation", described.as_str()),
                ("text", state.text.as_str()),
                ("format", SchemaKind::Feedback.expected_format()),
            ],
        );

        let report = self
            .exchange_with(
                run,
                state.round,
                Stage::DetectionFeedback,
                AgentRole::DetectionFeedback,
                prompt,
                &Schema::feedback(DETECTION_FEEDBACK_FALLBACK),
                explanation,
            )
            .await?;

        state.feedback = Some(
            report
                .record
                .text("feedback")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(DETECTION_FEEDBACK_FALLBACK)
                .to_string(),
        );
        Ok(state)
    }

    /// Headline for the final text; the original title is the fallback.
    pub(super) async fn generate_title(&self, run: &mut DocumentRun) -> Result<String, RuntimeError> {
        let title = run.document.original_title.clone();
        let text = run.document.current_text.clone();
        let prompt = self.prompts.render(
            PromptKey::Title,
            &[
                ("title", title.as_str()),
                ("text", text.as_str()),
                ("format", SchemaKind::Title.expected_format()),
            ],
        );
        let round = run.document.round_index;
        let schema = Schema::title(title.as_str());
        let report = self
            .exchange(run, round, Stage::Title, AgentRole::TitleGenerator, prompt, &schema)
            .await?;
        Ok(report.record.text("title").unwrap_or(title.as_str()).to_string())
    }
}
