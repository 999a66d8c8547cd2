//! Runtime configuration.
//!
//! Loaded from YAML; every section and field has a default, so an empty
//! file is a valid configuration. Durations are written in humantime
//! form (`"45s"`, `"2m"`).
//!
//! ```yaml
//! pipeline:
//!   mode: staged
//!   disabled: numeric_rewrite
//!   max_rounds: 3
//! classifier:
//!   backend: remote
//!   endpoint: http://localhost:8080/score
//! provider:
//!   type: openai
//!   model: gpt-4o-mini
//! calls:
//!   timeout: 90s
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::explainer::ExplainerConfig;
use crate::prompts::PromptLibrary;
use crate::providers::CompletionConfig;
use crate::validator::DEFAULT_MAX_ATTEMPTS;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

fn normalized(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// How a round is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// One agent per stage.
    #[default]
    Staged,
    /// A single agent rewrites the whole text and applies all feedback.
    Universal,
}

impl FromStr for PipelineMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "staged" | "full" | "2" => Ok(PipelineMode::Staged),
            "universal" | "single" | "1" => Ok(PipelineMode::Universal),
            _ => Err(ConfigError::Invalid(format!(
                "unknown mode '{}', expected 'staged' or 'universal'",
                s
            ))),
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Staged => f.write_str("staged"),
            PipelineMode::Universal => f.write_str("universal"),
        }
    }
}

/// A stage that can be switched off in staged mode.
///
/// Disabling a rewrite stage also disables its feedback sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableTarget {
    SentenceSelect,
    SentenceRewrite,
    StyleTransform,
    NumericRewrite,
}

impl DisableTarget {
    pub fn name(&self) -> &'static str {
        match self {
            DisableTarget::SentenceSelect => "sentence_select",
            DisableTarget::SentenceRewrite => "sentence_rewrite",
            DisableTarget::StyleTransform => "style_transform",
            DisableTarget::NumericRewrite => "numeric_rewrite",
        }
    }
}

impl FromStr for DisableTarget {
    type Err = ConfigError;

    /// Accepts stage names, agent names, or the numbers 1 to 4.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "1" | "sentenceselect" | "sentenceselector" | "semantic" => {
                Ok(DisableTarget::SentenceSelect)
            }
            "2" | "sentencerewrite" | "sentencerewriter" | "salient" => {
                Ok(DisableTarget::SentenceRewrite)
            }
            "3" | "styletransform" | "styletransformer" | "narrative" | "style" => {
                Ok(DisableTarget::StyleTransform)
            }
            "4" | "numericrewrite" | "numericrewriter" | "number" | "numeric" => {
                Ok(DisableTarget::NumericRewrite)
            }
            _ => Err(ConfigError::Invalid(format!("unknown stage to disable: '{}'", s))),
        }
    }
}

impl fmt::Display for DisableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the rewritten sentence is put back into the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceStrategy {
    /// Replace the first verbatim occurrence locally.
    #[default]
    Local,
    /// Ask the splice agent, with the local splice as fallback.
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub disabled: Option<DisableTarget>,
    pub max_rounds: usize,
    pub splice: SpliceStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Staged,
            disabled: None,
            max_rounds: 2,
            splice: SpliceStrategy::Local,
        }
    }
}

impl PipelineConfig {
    pub fn is_enabled(&self, target: DisableTarget) -> bool {
        self.disabled != Some(target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Total tries per response, the first included.
    pub max_attempts: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierBackend {
    /// Pretrained model behind an HTTP scoring endpoint.
    #[default]
    Remote,
    /// A generation agent asked for a one-word verdict.
    AgentJudge,
}

impl FromStr for ClassifierBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "remote" | "model" | "bert" => Ok(ClassifierBackend::Remote),
            "agentjudge" | "judge" | "llm" => Ok(ClassifierBackend::AgentJudge),
            _ => Err(ConfigError::Invalid(format!(
                "unknown classifier backend '{}', expected 'remote' or 'agent_judge'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub endpoint: Option<String>,
    pub max_chunk_tokens: usize,
    /// Cached predictions; 0 disables the cache.
    pub cache_entries: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Remote,
            endpoint: None,
            max_chunk_tokens: 510,
            cache_entries: 10_000,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let completion = CompletionConfig::default();
        Self {
            provider_type: "openai".to_string(),
            base_url: None,
            model: completion.model,
            api_key: None,
            api_key_env: None,
            temperature: completion.temperature,
            max_tokens: completion.max_tokens,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_type", &self.provider_type)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ProviderConfig {
    /// JSON form handed to the provider registry.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = json!({ "model": self.model });
        if let Some(url) = &self.base_url {
            value["base_url"] = json!(url);
        }
        if let Some(key) = &self.api_key {
            value["api_key"] = json!(key);
        }
        if let Some(env) = &self.api_key_env {
            value["api_key_env"] = json!(env);
        }
        value
    }

    pub fn completion(&self, timeout: Duration) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    /// Limit on every external call.
    #[serde(with = "duration_human")]
    pub timeout: Duration,
    /// Extra attempts after a rate limit or network failure.
    pub transient_retries: usize,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            transient_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory of `<stage>.txt` files replacing built-in prompts.
    pub dir: Option<PathBuf>,
    /// Directory of numbered technique files.
    pub technique_dir: Option<PathBuf>,
}

impl PromptsConfig {
    pub fn load(&self) -> Result<PromptLibrary, ConfigError> {
        let mut library = PromptLibrary::builtin();
        if let Some(dir) = &self.dir {
            library = library.with_overrides(dir)?;
        }
        if let Some(dir) = &self.technique_dir {
            library = library.with_technique_dir(dir)?;
        }
        Ok(library)
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub pipeline: PipelineConfig,
    pub validator: ValidatorConfig,
    pub explainer: ExplainerConfig,
    pub classifier: ClassifierConfig,
    pub provider: ProviderConfig,
    pub calls: CallsConfig,
    pub output: OutputConfig,
    pub prompts: PromptsConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = if yaml.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_rounds < 1 {
            return Err(ConfigError::Invalid(
                "pipeline.max_rounds must be at least 1".to_string(),
            ));
        }
        if self.validator.max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "validator.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.explainer.mask_window < 1 {
            return Err(ConfigError::Invalid(
                "explainer.mask_window must be at least 1".to_string(),
            ));
        }
        if self.classifier.max_chunk_tokens < 1 {
            return Err(ConfigError::Invalid(
                "classifier.max_chunk_tokens must be at least 1".to_string(),
            ));
        }
        if self.pipeline.mode == PipelineMode::Universal && self.pipeline.disabled.is_some() {
            tracing::warn!("pipeline.disabled has no effect in universal mode");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RuntimeConfig::from_yaml("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.pipeline.max_rounds, 2);
        assert_eq!(config.validator.max_attempts, 3);
        assert_eq!(config.calls.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
pipeline:
  mode: universal
  max_rounds: 4
classifier:
  backend: agent_judge
calls:
  timeout: 1m 30s
provider:
  type: openai
  base_url: http://localhost:11434/v1
  api_key_env: LOCAL_KEY
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pipeline.mode, PipelineMode::Universal);
        assert_eq!(config.pipeline.max_rounds, 4);
        assert_eq!(config.pipeline.splice, SpliceStrategy::Local);
        assert_eq!(config.classifier.backend, ClassifierBackend::AgentJudge);
        assert_eq!(config.calls.timeout, Duration::from_secs(90));
        assert_eq!(config.calls.transient_retries, 2);

        let json = config.provider.to_json();
        assert_eq!(json["base_url"], "http://localhost:11434/v1");
        assert_eq!(json["api_key_env"], "LOCAL_KEY");
        assert!(json.get("api_key").is_none());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let err = RuntimeConfig::from_yaml("pipeline:\n  max_rounds: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = RuntimeConfig::from_yaml("calls:\n  timeout: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_disable_target_names() {
        assert_eq!("3".parse::<DisableTarget>().unwrap(), DisableTarget::StyleTransform);
        assert_eq!(
            "NumberModifier".parse::<DisableTarget>().unwrap(),
            DisableTarget::NumericRewrite
        );
        assert_eq!(
            "sentence_select".parse::<DisableTarget>().unwrap(),
            DisableTarget::SentenceSelect
        );
        assert!("7".parse::<DisableTarget>().is_err());
    }

    #[test]
    fn test_mode_and_backend_names() {
        assert_eq!("Universal".parse::<PipelineMode>().unwrap(), PipelineMode::Universal);
        assert_eq!("llm".parse::<ClassifierBackend>().unwrap(), ClassifierBackend::AgentJudge);
        assert!("parallel".parse::<PipelineMode>().is_err());
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let provider = ProviderConfig {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recast.yaml");
        std::fs::write(&path, "output:\n  dir: runs/today\n").unwrap();

        let config = RuntimeConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.output.dir, PathBuf::from("runs/today"));

        let missing = RuntimeConfig::from_yaml_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
