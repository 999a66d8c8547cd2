//! Async driver for the response repair chain.
//!
//! Runs [`parse_response`] on a raw agent reply and, while the reply does
//! not fit the schema, asks the same agent again through a
//! [`RetryCallback`]. When attempts run out the schema fallback is
//! returned, so callers never branch on malformed output.

use async_trait::async_trait;
use serde::Serialize;

use crate::agents::{AgentError, GenerationAgent};
use recast_core::response::{
    correction_message, parse_response, ParseOutcome, Record, RetryState, Schema,
};

/// Default total tries per validation, the first included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Re-request channel back to the agent that produced a reply.
#[async_trait]
pub trait RetryCallback: Send + Sync {
    async fn retry(&self, correction: &str) -> Result<String, AgentError>;
}

#[async_trait]
impl<T: GenerationAgent + ?Sized> RetryCallback for T {
    async fn retry(&self, correction: &str) -> Result<String, AgentError> {
        self.reissue(correction).await
    }
}

/// Outcome of one validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Schema-conformant record; the fallback when `exhausted`.
    pub record: Record,
    /// Replies parsed, the first included.
    pub attempts: u32,
    /// Whether the fallback was used.
    pub exhausted: bool,
    /// Last reply received from the agent.
    pub last_response: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseValidator {
    max_attempts: u32,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl ResponseValidator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Validate `raw` against `schema`, re-asking through `callback`.
    ///
    /// Only a failed re-request is an error; malformed replies always end
    /// in `Ok`.
    pub async fn validate(
        &self,
        raw: &str,
        schema: &Schema,
        callback: &(impl RetryCallback + ?Sized),
    ) -> Result<ValidationReport, AgentError> {
        let mut state = RetryState::new(self.max_attempts);
        let mut current = raw.to_string();

        loop {
            let error = match parse_response(&current, schema) {
                ParseOutcome::Valid(record) => {
                    return Ok(ValidationReport {
                        record,
                        attempts: state.attempts_used + 1,
                        exhausted: false,
                        last_response: current,
                        last_error: state.last_error,
                    });
                }
                ParseOutcome::Invalid(error) => error,
            };

            state = state.record_failure(error.clone());
            if state.is_exhausted() {
                tracing::warn!(
                    schema = schema.name(),
                    attempts = state.attempts_used,
                    error = %error,
                    "response never matched schema, using fallback"
                );
                return Ok(ValidationReport {
                    record: schema.fallback().clone(),
                    attempts: state.attempts_used,
                    exhausted: true,
                    last_response: current,
                    last_error: state.last_error,
                });
            }

            tracing::debug!(
                schema = schema.name(),
                attempt = state.attempts_used,
                remaining = state.remaining(),
                error = %error,
                "requesting corrected response"
            );
            let correction = correction_message(&current, &error, schema);
            current = callback.retry(&correction).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRole;
    use crate::testing::ScriptedAgent;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_valid_first_reply_needs_no_retry() {
        let agent = ScriptedAgent::new(AgentRole::TitleGenerator, Vec::<String>::new());
        let report = ResponseValidator::default()
            .validate(r#"{"title": "Fresh"}"#, &Schema::title("Old"), &agent)
            .await
            .unwrap();
        assert_eq!(report.record.text("title"), Some("Fresh"));
        assert_eq!(report.attempts, 1);
        assert!(!report.exhausted);
        assert_eq!(agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let agent = ScriptedAgent::new(AgentRole::TitleGenerator, [r#"{"title": "Second"}"#]);
        let report = ResponseValidator::default()
            .validate("no json here", &Schema::title("Old"), &agent)
            .await
            .unwrap();
        assert_eq!(report.record.text("title"), Some("Second"));
        assert_eq!(report.attempts, 2);

        let prompts = agent.prompts();
        assert!(prompts[0].contains("no json here"));
        assert!(prompts[0].contains(r#"{ "title": "New title here" }"#));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_exact_fallback() {
        let agent = ScriptedAgent::new(AgentRole::StyleTransformer, ["still not json", "nope"]);
        let schema = Schema::modified_text("the original text");
        let report = ResponseValidator::new(3)
            .validate("garbage", &schema, &agent)
            .await
            .unwrap();
        assert!(report.exhausted);
        assert_eq!(report.attempts, 3);
        assert_eq!(&report.record, schema.fallback());
        assert_eq!(agent.call_count(), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_never_calls_back() {
        let agent = ScriptedAgent::new(AgentRole::Evaluator, Vec::<String>::new());
        let report = ResponseValidator::new(1)
            .validate("garbage", &Schema::evaluator_feedback(), &agent)
            .await
            .unwrap();
        assert!(report.exhausted);
        assert_eq!(agent.call_count(), 0);
        assert_eq!(
            report.record.feedback("feedback")[0].message,
            "Fallback feedback: invalid format."
        );
    }

    #[tokio::test]
    async fn test_callback_failure_propagates() {
        let agent = ScriptedAgent::failing(AgentRole::Critic);
        let result = ResponseValidator::default()
            .validate("garbage", &Schema::feedback("Please revise"), &agent)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_revalidating_a_valid_record_is_identity() {
        let agent = ScriptedAgent::new(AgentRole::SentenceSelector, Vec::<String>::new());
        let schema = Schema::key_sentences();
        let validator = ResponseValidator::default();

        let first = validator
            .validate(
                r#"{"key_sentences": ["A."], "numbers": ["7km"]}"#,
                &schema,
                &agent,
            )
            .await
            .unwrap();
        let raw = serde_json::to_string(&first.record).unwrap();
        let second = validator.validate(&raw, &schema, &agent).await.unwrap();
        assert_eq!(first.record, second.record);
    }

    fn reply() -> impl Strategy<Value = String> {
        prop_oneof![
            "\\PC{0,60}",
            r#"[a-z ]{0,10}\{ ?"(modified_text|text|feedback)": ?"[a-z {}"]{0,20}"? ?\}?[a-z ]{0,10}"#,
            "\\PC{0,20}".prop_map(|text| serde_json::json!({ "modified_text": text }).to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_result_is_schema_valid_or_exact_fallback(
            raw in reply(),
            replies in proptest::collection::vec(reply(), 0..3),
        ) {
            let schema = Schema::modified_text("the original text");
            let validator = ResponseValidator::new(replies.len() as u32 + 1);
            let agent = ScriptedAgent::new(AgentRole::StyleTransformer, replies.clone());

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let report = runtime
                .block_on(validator.validate(&raw, &schema, &agent))
                .unwrap();

            prop_assert!(report.attempts <= validator.max_attempts());
            prop_assert!(agent.call_count() <= replies.len());
            if report.exhausted {
                prop_assert_eq!(&report.record, schema.fallback());
            } else {
                let value = serde_json::to_value(&report.record).unwrap();
                prop_assert_eq!(schema.check(&value), ParseOutcome::Valid(report.record.clone()));
            }
        }
    }
}
