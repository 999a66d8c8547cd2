//! API keys for LLM providers and remote classifiers.
//!
//! A key is wrapped in [`secrecy::SecretString`] as soon as it is read and
//! is only exposed where a request header is built.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Config,
    Environment,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
        })
    }
}

pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// `config[config_key]` if set, else the `env_var` environment variable.
    ///
    /// `None` when neither is present; local model servers accept
    /// anonymous requests, so a missing key is not an error here.
    pub fn optional(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Option<Self> {
        if let Some(value) = config[config_key].as_str() {
            return Some(Self::new(value, CredentialSource::Config, name));
        }
        std::env::var(env_var)
            .ok()
            .filter(|value| !value.is_empty())
            .map(|value| Self::new(value, CredentialSource::Environment, name))
    }

    /// Only for building a request header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, [REDACTED])", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-recast-secret-0001";

    #[test]
    fn test_value_never_formatted() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Config, "classifier key");

        for rendered in [format!("{:?}", cred), format!("{}", cred)] {
            assert!(!rendered.contains(SECRET));
            assert!(rendered.contains("[REDACTED]"));
        }
        assert_eq!(cred.to_string(), "classifier key (config, [REDACTED])");
        assert_eq!(cred.expose(), SECRET);
    }

    #[test]
    fn test_config_beats_environment() {
        std::env::set_var("RECAST_TEST_KEY_PRIORITY", "env-key");
        let config = serde_json::json!({ "api_key": "config-key" });

        let cred = ApiCredential::optional(&config, "api_key", "RECAST_TEST_KEY_PRIORITY", "k").unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);

        let cred = ApiCredential::optional(
            &serde_json::json!({}),
            "api_key",
            "RECAST_TEST_KEY_PRIORITY",
            "k",
        )
        .unwrap();
        assert_eq!(cred.source(), CredentialSource::Environment);
        std::env::remove_var("RECAST_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_missing_key_is_none() {
        assert!(ApiCredential::optional(&serde_json::json!({}), "api_key", "RECAST_NO_SUCH_VAR", "k").is_none());
    }
}
