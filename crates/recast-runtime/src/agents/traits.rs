//! Generation agent trait and roles.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::providers::ProviderError;

/// Errors from generation agents.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Agent not configured: {0}")]
    NotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether the call may succeed if made again.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Provider(e) => e.is_transient(),
            AgentError::Timeout(_) => true,
            AgentError::NotConfigured(_) | AgentError::Internal(_) => false,
        }
    }
}

/// The part an agent plays in a revision round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgentRole {
    SentenceSelector,
    SentenceRewriter,
    Critic,
    Splicer,
    StyleTransformer,
    NumericRewriter,
    Evaluator,
    TitleGenerator,
    DetectionFeedback,
    Universal,
    Judge,
}

impl AgentRole {
    pub const ALL: [AgentRole; 11] = [
        AgentRole::SentenceSelector,
        AgentRole::SentenceRewriter,
        AgentRole::Critic,
        AgentRole::Splicer,
        AgentRole::StyleTransformer,
        AgentRole::NumericRewriter,
        AgentRole::Evaluator,
        AgentRole::TitleGenerator,
        AgentRole::DetectionFeedback,
        AgentRole::Universal,
        AgentRole::Judge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::SentenceSelector => "sentence_selector",
            AgentRole::SentenceRewriter => "sentence_rewriter",
            AgentRole::Critic => "critic",
            AgentRole::Splicer => "splicer",
            AgentRole::StyleTransformer => "style_transformer",
            AgentRole::NumericRewriter => "numeric_rewriter",
            AgentRole::Evaluator => "evaluator",
            AgentRole::TitleGenerator => "title_generator",
            AgentRole::DetectionFeedback => "detection_feedback",
            AgentRole::Universal => "universal",
            AgentRole::Judge => "judge",
        }
    }

    /// Resolve an evaluator target name.
    ///
    /// Case, spaces, dashes and underscores are ignored, and the older
    /// `*Modifier` / `*Agent` spellings are accepted.
    pub fn from_target_name(name: &str) -> Option<AgentRole> {
        let key: String = name
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        let role = match key.as_str() {
            "styletransformer" | "narrativemodifier" | "narrativeagent" | "style" => {
                AgentRole::StyleTransformer
            }
            "numericrewriter" | "numbermodifier" | "numberagent" | "numeric" => {
                AgentRole::NumericRewriter
            }
            "sentencerewriter" | "sentencemodifier" => AgentRole::SentenceRewriter,
            "universal" | "universalagent" => AgentRole::Universal,
            _ => return None,
        };
        Some(role)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A text-in/text-out generation capability.
///
/// `issue` starts a fresh exchange. `reissue` continues it with a
/// corrective message, so the agent can see what it answered before.
/// Responses carry no structural guarantee; callers route them through
/// the response validator.
#[async_trait]
pub trait GenerationAgent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn issue(&self, prompt: &str) -> Result<String, AgentError>;

    async fn reissue(&self, correction: &str) -> Result<String, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_target_names() {
        assert_eq!(
            AgentRole::from_target_name("NarrativeModifier"),
            Some(AgentRole::StyleTransformer)
        );
        assert_eq!(
            AgentRole::from_target_name("style_transformer"),
            Some(AgentRole::StyleTransformer)
        );
        assert_eq!(
            AgentRole::from_target_name("Numeric Rewriter"),
            Some(AgentRole::NumericRewriter)
        );
        assert_eq!(
            AgentRole::from_target_name("UniversalAgent"),
            Some(AgentRole::Universal)
        );
        assert_eq!(AgentRole::from_target_name("Unknown"), None);
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in [
            AgentRole::StyleTransformer,
            AgentRole::NumericRewriter,
            AgentRole::SentenceRewriter,
            AgentRole::Universal,
        ] {
            assert_eq!(AgentRole::from_target_name(role.name()), Some(role));
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(AgentError::from(ProviderError::RateLimited { retry_after: None }).is_transient());
        assert!(!AgentError::NotConfigured("x".into()).is_transient());
    }
}
