//! Generation agent backed by an [`LlmProvider`].

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{AgentError, AgentRole, GenerationAgent};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};

/// One role bound to a provider, a system prompt and call limits.
///
/// Keeps the messages of the current exchange so a corrective
/// [`reissue`](GenerationAgent::reissue) carries the previous answer.
pub struct ProviderAgent {
    role: AgentRole,
    system_prompt: String,
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    call_timeout: Duration,
    transient_retries: usize,
    history: Mutex<Vec<ChatMessage>>,
}

impl ProviderAgent {
    pub fn new(role: AgentRole, provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        let call_timeout = completion.timeout;
        Self {
            role,
            system_prompt: String::new(),
            provider,
            completion,
            call_timeout,
            transient_retries: 2,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Outer deadline for one provider call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Extra attempts for transient provider failures.
    pub fn with_transient_retries(mut self, retries: usize) -> Self {
        self.transient_retries = retries;
        self
    }

    async fn call_once(&self, messages: Vec<ChatMessage>) -> Result<String, AgentError> {
        let response = tokio::time::timeout(
            self.call_timeout,
            self.provider.complete(messages, &self.completion),
        )
        .await
        .map_err(|_| AgentError::Timeout(self.call_timeout))??;

        tracing::debug!(
            role = %self.role,
            provider = self.provider.name(),
            tokens = response.usage.total(),
            "completion received"
        );
        Ok(response.content)
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String, AgentError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_times(self.transient_retries);

        let content = (|| self.call_once(messages.clone()))
            .retry(backoff)
            .when(AgentError::is_transient)
            .notify(|err, delay| {
                tracing::warn!(role = %self.role, error = %err, ?delay, "retrying provider call");
            })
            .await?;

        let mut history = self.history.lock();
        *history = messages;
        history.push(ChatMessage::assistant(content.clone()));
        Ok(content)
    }
}

#[async_trait]
impl GenerationAgent for ProviderAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn issue(&self, prompt: &str) -> Result<String, AgentError> {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(prompt));
        self.send(messages).await
    }

    async fn reissue(&self, correction: &str) -> Result<String, AgentError> {
        let mut messages = self.history.lock().clone();
        if messages.is_empty() && !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(correction));
        self.send(messages).await
    }
}

impl std::fmt::Debug for ProviderAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAgent")
            .field("role", &self.role)
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatRole, CompletionResponse, ProviderError, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails transiently `failures` times, then echoes the message count.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(messages.clone());
            if n < self.failures {
                return Err(ProviderError::Http("connection reset".into()));
            }
            Ok(CompletionResponse {
                content: format!("reply to {} messages", messages.len()),
                usage: TokenUsage::default(),
                model: "flaky".into(),
            })
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(FlakyProvider::new(2));
        let agent = ProviderAgent::new(
            AgentRole::StyleTransformer,
            provider.clone(),
            CompletionConfig::default(),
        )
        .with_transient_retries(2);

        let reply = agent.issue("hello").await.unwrap();
        assert_eq!(reply, "reply to 1 messages");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_propagates() {
        let provider = Arc::new(FlakyProvider::new(5));
        let agent = ProviderAgent::new(AgentRole::Critic, provider, CompletionConfig::default())
            .with_transient_retries(1);

        let err = agent.issue("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(ProviderError::Http(_))));
    }

    #[tokio::test]
    async fn test_reissue_continues_exchange() {
        let provider = Arc::new(FlakyProvider::new(0));
        let agent = ProviderAgent::new(AgentRole::Evaluator, provider.clone(), CompletionConfig::default())
            .with_system_prompt("be brief");

        agent.issue("first").await.unwrap();
        let reply = agent.reissue("fix your format").await.unwrap();
        // system, user, assistant, user
        assert_eq!(reply, "reply to 4 messages");

        let seen = provider.seen.lock();
        assert_eq!(seen[1][2].role, ChatRole::Assistant);
        assert_eq!(seen[1][3].content, "fix your format");

        drop(seen);
        // A fresh issue forgets the previous exchange
        assert_eq!(agent.issue("again").await.unwrap(), "reply to 2 messages");
    }
}
