//! LLM backends for generation agents.
//!
//! Agents reach a language model only through [`LlmProvider`]. The bundled
//! backend speaks the OpenAI-compatible chat API, which also covers local
//! servers such as Ollama and vLLM. Keys are held as [`ApiCredential`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unreadable completion: {0}")]
    InvalidResponse(String),

    #[error("Credentials rejected")]
    Unauthorized,

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Network faults, rate limits and server errors. Sending the same
    /// request again may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::RateLimited { .. } | ProviderError::Timeout(_) => {
                true
            }
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Model parameters for one completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that served the request, as reported by the backend.
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let value = serde_json::to_value(ChatMessage::assistant("ok")).unwrap();
        assert_eq!(value, serde_json::json!({ "role": "assistant", "content": "ok" }));
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProviderError::Http("reset".into()).is_transient());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!ProviderError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!ProviderError::Unauthorized.is_transient());
        assert!(!ProviderError::InvalidResponse("no choices".into()).is_transient());
    }
}
