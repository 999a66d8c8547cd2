//! Round orchestrator.
//!
//! Drives one document through revision rounds until the classifier lets
//! it pass or the round budget runs out.
//!
//! # Round structure
//! Staged mode runs, in this fixed order:
//! 1. seed revision (rounds after the first, with the carried feedback)
//! 2. sentence select, rewrite, critique and retry
//! 3. splice, style transform, numeric rewrite, critique and retry
//! 4. evaluation, whose feedback re-runs the targeted rewriters
//! 5. classify; a flagged text is explained and turned into feedback
//!    for the next round
//!
//! Universal mode replaces steps 1 to 3 with a single rewrite.
//!
//! Stages are strictly sequential: each consumes the text the previous
//! one produced. Every agent reply goes through the response validator,
//! so malformed output never stops a round. Agent or classifier
//! failures do, and are reported per document by the batch runner.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::agents::{AgentError, AgentRole, GenerationAgent};
use crate::classifier::{ChunkModel, ChunkedOracle, ClassifierOracle, TimedOracle};
use crate::config::{ConfigError, DisableTarget, PipelineConfig, PipelineMode, RuntimeConfig};
use crate::explainer::Explainer;
use crate::prompts::PromptLibrary;
use crate::sink::{AuditRecord, DocumentOutcome, RecordSink, TimingRow};
use crate::validator::{ResponseValidator, ValidationReport};
use crate::RuntimeError;
use recast_core::response::Schema;
use recast_core::{Document, Explanation, LexicalScorer, MetricsScorer, Stage, Verdict};

mod batch;
mod stages;
mod state;

pub use batch::{BatchRunner, BatchSummary};
pub use stages::{
    DETECTION_FEEDBACK_FALLBACK, NO_ATTRIBUTION, NUMERIC_CRITIQUE_FALLBACK, SENTENCE_CRITIQUE_FALLBACK,
};
pub use state::{DocumentRun, RoundState};

/// Runs revision rounds over documents.
pub struct RoundOrchestrator {
    agents: BTreeMap<AgentRole, Arc<dyn GenerationAgent>>,
    oracle: Arc<dyn ClassifierOracle>,
    /// `None` when no chunk model was supplied; flagged rounds then get
    /// feedback without attribution.
    explainer: Option<Explainer>,
    scorer: Arc<dyn MetricsScorer>,
    validator: ResponseValidator,
    prompts: PromptLibrary,
    sink: Arc<dyn RecordSink>,
    config: RuntimeConfig,
}

impl RoundOrchestrator {
    pub fn builder() -> RoundOrchestratorBuilder {
        RoundOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.sink
    }

    fn pipeline(&self) -> &PipelineConfig {
        &self.config.pipeline
    }

    fn enabled(&self, target: DisableTarget) -> bool {
        self.pipeline().mode == PipelineMode::Staged && self.pipeline().is_enabled(target)
    }

    fn agent(&self, role: AgentRole) -> Result<&Arc<dyn GenerationAgent>, RuntimeError> {
        self.agents
            .get(&role)
            .ok_or_else(|| AgentError::NotConfigured(role.name().to_string()).into())
    }

    /// Issue `prompt` to the agent for `role` and validate its reply.
    ///
    /// The exchange is timed under `stage` and written to the audit log.
    async fn exchange(
        &self,
        run: &mut DocumentRun,
        round: usize,
        stage: Stage,
        role: AgentRole,
        prompt: String,
        schema: &Schema,
    ) -> Result<ValidationReport, RuntimeError> {
        self.exchange_with(run, round, stage, role, prompt, schema, None)
            .await
    }

    /// [`exchange`](Self::exchange) with an explanation attached to the
    /// audit record.
    #[allow(clippy::too_many_arguments)]
    async fn exchange_with(
        &self,
        run: &mut DocumentRun,
        round: usize,
        stage: Stage,
        role: AgentRole,
        prompt: String,
        schema: &Schema,
        explanation: Option<Explanation>,
    ) -> Result<ValidationReport, RuntimeError> {
        let agent = self.agent(role)?;
        let started = Instant::now();

        let raw = agent.issue(&prompt).await?;
        let report = self.validator.validate(&raw, schema, agent.as_ref()).await?;

        run.timings.record(stage, started.elapsed());
        run.calls += report.attempts as usize;

        tracing::debug!(
            document = %run.id(),
            round,
            stage = %stage,
            agent = %role,
            attempts = report.attempts,
            fallback = report.exhausted,
            "exchange complete"
        );

        self.sink.write_audit(&AuditRecord {
            document: run.id().to_string(),
            round,
            stage,
            request: prompt,
            response: report.last_response.clone(),
            record: Some(report.record.to_value()),
            explanation,
        })?;
        Ok(report)
    }

    async fn classify(&self, run: &mut DocumentRun, text: &str) -> Result<Verdict, RuntimeError> {
        let started = Instant::now();
        let verdict = self.oracle.predict(text).await?;
        run.timings.record(Stage::Classify, started.elapsed());
        run.calls += 1;
        Ok(verdict)
    }

    /// Run every round for `document` and produce its result row.
    ///
    /// The timing row is written here; the result row is left to the
    /// caller so failed documents can be recorded the same way.
    pub async fn run_document(&self, document: Document) -> Result<DocumentOutcome, RuntimeError> {
        let max_rounds = self.pipeline().max_rounds.max(1);
        let mut run = DocumentRun::new(document);

        let original = run.document.original_text.clone();
        let baseline = self.classify(&mut run, &original).await?;
        tracing::info!(
            document = %run.id(),
            label = %baseline.label,
            mode = %self.pipeline().mode,
            max_rounds,
            "starting document"
        );

        let mut outcome = DocumentOutcome {
            id: run.document.id.clone(),
            original_title: run.document.original_title.clone(),
            original_text: original.clone(),
            baseline_verdict: Some(baseline),
            ..Default::default()
        };

        let mut feedback = None;
        for round in 1..=max_rounds {
            let state = self.run_round(&mut run, round, feedback.take()).await?;
            let verdict = state
                .verdict
                .ok_or_else(|| RuntimeError::Incomplete(format!("round {} has no verdict", round)))?;

            run.document.current_text = state.text.clone();
            run.document.finish_round(verdict, state.feedback.clone());

            if round == 1 {
                outcome.first_round_text = state.text.clone();
                outcome.first_round_verdict = Some(verdict);
                outcome.initial_metrics = Some(self.scorer.score(&original, &state.text));
            }
            outcome.final_verdict = Some(verdict);
            outcome.rounds_used = round;

            tracing::info!(
                document = %run.id(),
                round,
                label = %verdict.label,
                manufactured = verdict.probabilities.manufactured,
                "round complete"
            );

            if verdict.is_authentic() {
                outcome.success = true;
                break;
            }
            feedback = state.feedback;
        }

        outcome.modified_text = run.document.current_text.clone();
        outcome.final_metrics = Some(self.scorer.score(&original, &outcome.modified_text));
        outcome.modified_title = self.generate_title(&mut run).await?;

        self.sink.write_timing(&TimingRow::new(run.id(), &run.timings))?;
        tracing::info!(
            document = %run.id(),
            success = outcome.success,
            rounds = outcome.rounds_used,
            calls = run.calls,
            "document finished"
        );
        Ok(outcome)
    }

    async fn run_round(
        &self,
        run: &mut DocumentRun,
        round: usize,
        feedback: Option<String>,
    ) -> Result<RoundState, RuntimeError> {
        let first = match self.pipeline().mode {
            PipelineMode::Staged => Stage::SeedRevision,
            PipelineMode::Universal => Stage::UniversalRewrite,
        };
        let text = run.document.current_text.clone();
        let mut state = RoundState::new(round, first, text, feedback);

        loop {
            if self.is_active(&state) {
                tracing::debug!(document = %run.id(), round, stage = %state.stage, "stage");
                state = self.run_stage(run, state).await?;
            }
            match state.stage.next() {
                Some(next) => state.stage = next,
                None => break,
            }
        }
        Ok(state)
    }

    /// Whether the current stage applies to this round.
    fn is_active(&self, state: &RoundState) -> bool {
        match state.stage {
            Stage::SeedRevision => state.round > 1 && state.feedback.is_some(),
            Stage::FeedbackOnSentence => self.enabled(DisableTarget::SentenceRewrite),
            Stage::SentenceRewriteRetry | Stage::NumericRewriteRetry => state.critique.is_some(),
            Stage::NumericConsistencyFeedback => self.enabled(DisableTarget::NumericRewrite),
            Stage::DetectionFeedback => {
                state.is_flagged() && state.round < self.pipeline().max_rounds
            }
            Stage::Title => false,
            _ => true,
        }
    }

    async fn run_stage(
        &self,
        run: &mut DocumentRun,
        state: RoundState,
    ) -> Result<RoundState, RuntimeError> {
        match state.stage {
            Stage::SeedRevision => self.seed_revision(run, state).await,
            Stage::SentenceSelect => self.select_sentence(run, state).await,
            Stage::SentenceRewrite => self.rewrite_sentence(run, state, false).await,
            Stage::FeedbackOnSentence => self.critique_sentence(run, state).await,
            Stage::SentenceRewriteRetry => self.rewrite_sentence(run, state, true).await,
            Stage::TextSplice => self.splice(run, state).await,
            Stage::StyleTransform => self.transform_style(run, state).await,
            Stage::NumericRewrite => self.rewrite_numbers(run, state, false).await,
            Stage::NumericConsistencyFeedback => self.critique_numbers(run, state).await,
            Stage::NumericRewriteRetry => self.rewrite_numbers(run, state, true).await,
            Stage::UniversalRewrite => self.universal_rewrite(run, state).await,
            Stage::Evaluation => self.evaluate(run, state).await,
            Stage::Classify => {
                let verdict = self.classify(run, &state.text).await?;
                Ok(RoundState {
                    verdict: Some(verdict),
                    ..state
                })
            }
            Stage::DetectionFeedback => self.detection_feedback(run, state).await,
            Stage::Title => Ok(state),
        }
    }
}

/// Roles a pipeline configuration calls on.
pub fn required_roles(pipeline: &PipelineConfig) -> Vec<AgentRole> {
    let mut roles = vec![
        AgentRole::Evaluator,
        AgentRole::DetectionFeedback,
        AgentRole::TitleGenerator,
    ];
    match pipeline.mode {
        PipelineMode::Universal => roles.push(AgentRole::Universal),
        PipelineMode::Staged => {
            roles.push(AgentRole::StyleTransformer);
            roles.push(AgentRole::Critic);
            if pipeline.is_enabled(DisableTarget::SentenceSelect) {
                roles.push(AgentRole::SentenceSelector);
            }
            if pipeline.is_enabled(DisableTarget::SentenceRewrite) {
                roles.push(AgentRole::SentenceRewriter);
            }
            if pipeline.is_enabled(DisableTarget::NumericRewrite) {
                roles.push(AgentRole::NumericRewriter);
            }
            if pipeline.splice == crate::config::SpliceStrategy::Agent {
                roles.push(AgentRole::Splicer);
            }
        }
    }
    roles
}

/// Builder for [`RoundOrchestrator`].
pub struct RoundOrchestratorBuilder {
    agents: BTreeMap<AgentRole, Arc<dyn GenerationAgent>>,
    oracle: Option<Arc<dyn ClassifierOracle>>,
    explainer_oracle: Option<Arc<dyn ClassifierOracle>>,
    scorer: Arc<dyn MetricsScorer>,
    prompts: PromptLibrary,
    sink: Option<Arc<dyn RecordSink>>,
    config: RuntimeConfig,
}

impl RoundOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            agents: BTreeMap::new(),
            oracle: None,
            explainer_oracle: None,
            scorer: Arc::new(LexicalScorer),
            prompts: PromptLibrary::builtin(),
            sink: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the agent for its role, replacing any earlier one.
    pub fn agent(mut self, agent: Arc<dyn GenerationAgent>) -> Self {
        self.agents.insert(agent.role(), agent);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn ClassifierOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Oracle used for salience attribution of flagged texts.
    ///
    /// Occlusion classifies the text once per word, so only a chunk model
    /// is accepted here. It may be the same oracle passed to
    /// [`oracle`](Self::oracle).
    pub fn explainer_oracle<M: ChunkModel + 'static>(mut self, oracle: Arc<ChunkedOracle<M>>) -> Self {
        self.explainer_oracle = Some(oracle);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn MetricsScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the orchestrator.
    ///
    /// Fails when the configuration is invalid, or when the oracle, the
    /// sink or an agent the pipeline needs is missing.
    pub fn build(self) -> Result<RoundOrchestrator, RuntimeError> {
        self.config.validate()?;

        let oracle = self
            .oracle
            .ok_or_else(|| ConfigError::Invalid("no classifier oracle set".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| ConfigError::Invalid("no record sink set".to_string()))?;

        let missing: Vec<&str> = required_roles(&self.config.pipeline)
            .into_iter()
            .filter(|role| !self.agents.contains_key(role))
            .map(|role| role.name())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "no agent for role(s): {}",
                missing.join(", ")
            ))
            .into());
        }

        let timeout = self.config.calls.timeout;
        let oracle: Arc<dyn ClassifierOracle> = Arc::new(TimedOracle::new(oracle, timeout));
        let explainer = match self.explainer_oracle {
            Some(model) => Some(
                Explainer::new(Arc::new(TimedOracle::new(model, timeout)))
                    .with_config(self.config.explainer.clone()),
            ),
            None => {
                tracing::warn!(
                    oracle = oracle.name(),
                    "no chunk model for explanations; detection feedback runs without attribution"
                );
                None
            }
        };

        Ok(RoundOrchestrator {
            agents: self.agents,
            oracle,
            explainer,
            scorer: self.scorer,
            validator: ResponseValidator::new(self.config.validator.max_attempts),
            prompts: self.prompts,
            sink,
            config: self.config,
        })
    }
}

impl Default for RoundOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpliceStrategy;
    use crate::sink::MemorySink;
    use crate::testing::{FixedOracle, ScriptedAgent, ScriptedModel};

    fn staged_agents() -> Vec<Arc<dyn GenerationAgent>> {
        [
            AgentRole::SentenceSelector,
            AgentRole::SentenceRewriter,
            AgentRole::Critic,
            AgentRole::StyleTransformer,
            AgentRole::NumericRewriter,
            AgentRole::Evaluator,
            AgentRole::DetectionFeedback,
            AgentRole::TitleGenerator,
        ]
        .into_iter()
        .map(|role| Arc::new(ScriptedAgent::new(role, Vec::<String>::new())) as Arc<dyn GenerationAgent>)
        .collect()
    }

    #[test]
    fn test_required_roles_follow_configuration() {
        let staged = required_roles(&PipelineConfig::default());
        assert!(staged.contains(&AgentRole::SentenceRewriter));
        assert!(!staged.contains(&AgentRole::Splicer));
        assert!(!staged.contains(&AgentRole::Universal));

        let without_numbers = required_roles(&PipelineConfig {
            disabled: Some(DisableTarget::NumericRewrite),
            splice: SpliceStrategy::Agent,
            ..Default::default()
        });
        assert!(!without_numbers.contains(&AgentRole::NumericRewriter));
        assert!(without_numbers.contains(&AgentRole::Splicer));

        let universal = required_roles(&PipelineConfig {
            mode: PipelineMode::Universal,
            ..Default::default()
        });
        assert!(universal.contains(&AgentRole::Universal));
        assert!(!universal.contains(&AgentRole::SentenceSelector));
    }

    #[test]
    fn test_build_requires_every_role() {
        let mut builder = RoundOrchestrator::builder()
            .oracle(Arc::new(FixedOracle::manufactured()))
            .sink(Arc::new(MemorySink::new()));
        for agent in staged_agents().into_iter().skip(1) {
            builder = builder.agent(agent);
        }
        let err = builder.build().err().unwrap();
        assert!(err.to_string().contains("sentence_selector"));
    }

    #[test]
    fn test_build_requires_oracle() {
        let mut builder = RoundOrchestrator::builder().sink(Arc::new(MemorySink::new()));
        for agent in staged_agents() {
            builder = builder.agent(agent);
        }
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_build_succeeds() {
        let mut builder = RoundOrchestrator::builder()
            .oracle(Arc::new(FixedOracle::manufactured()))
            .sink(Arc::new(MemorySink::new()));
        for agent in staged_agents() {
            builder = builder.agent(agent);
        }
        let orchestrator = builder.build().unwrap();
        assert_eq!(orchestrator.config().pipeline.max_rounds, 2);
        assert!(orchestrator.explainer.is_none());
    }

    #[test]
    fn test_build_with_explainer_model() {
        let model = Arc::new(ChunkedOracle::new(ScriptedModel::new(32)));
        let mut builder = RoundOrchestrator::builder()
            .oracle(model.clone())
            .explainer_oracle(model)
            .sink(Arc::new(MemorySink::new()));
        for agent in staged_agents() {
            builder = builder.agent(agent);
        }
        assert!(builder.build().unwrap().explainer.is_some());
    }
}
