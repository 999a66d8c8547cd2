//! Provider registry keyed by the `provider.type` config value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Value of `provider.type` this factory answers to.
    fn provider_type(&self) -> &'static str;

    /// Reject a configuration before anything is built.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the providers compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }

    /// A later factory for the same type replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.provider_type(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let Some(factory) = self.factories.get(provider_type) else {
            return Err(ProviderError::NotConfigured(format!(
                "unknown provider type '{}' (available: {})",
                provider_type,
                self.types().join(", ")
            )));
        };
        factory.validate_config(config)?;
        let provider = factory.create(config)?;
        tracing::debug!(provider = provider.name(), "provider created");
        Ok(provider)
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
    use async_trait::async_trait;

    struct EchoProvider {
        name: String,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                usage: TokenUsage::default(),
                model: config.model.clone(),
            })
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct EchoFactory;

    impl ProviderFactory for EchoFactory {
        fn provider_type(&self) -> &'static str {
            "echo"
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
            match config["name"].as_str() {
                Some("") => Err(ProviderError::NotConfigured("empty name".to_string())),
                _ => Ok(()),
            }
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            let name = config["name"].as_str().unwrap_or("echo").to_string();
            Ok(Arc::new(EchoProvider { name }))
        }
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoFactory));
        registry
    }

    #[tokio::test]
    async fn test_created_provider_answers() {
        let provider = registry()
            .create("echo", &serde_json::json!({ "name": "local-echo" }))
            .unwrap();
        assert_eq!(provider.name(), "local-echo");

        let reply = provider
            .complete(vec![ChatMessage::user("ping")], &CompletionConfig::default())
            .await
            .unwrap();
        assert_eq!(reply.content, "ping");
    }

    #[test]
    fn test_unknown_type_lists_available() {
        let err = registry()
            .create("missing", &serde_json::json!({}))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Provider not configured: unknown provider type 'missing' (available: echo)"
        );
    }

    #[test]
    fn test_invalid_config_is_rejected_before_create() {
        assert!(registry().create("echo", &serde_json::json!({ "name": "" })).is_err());
    }
}
