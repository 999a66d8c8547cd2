//! HTTP-hosted classifier model.
//!
//! Posts chunk texts to an inference endpoint:
//!
//! ```json
//! request:  { "inputs": ["chunk one ...", "chunk two ..."] }
//! response: { "probabilities": [[0.8, 0.2], [0.6, 0.4]] }
//! ```
//!
//! A bare array of pairs is accepted as the response too. Pair order is
//! `[authentic, manufactured]`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChunkModel, ClassifierError};
use crate::providers::ApiCredential;
use recast_core::ProbabilityPair;

/// Default chunk size, in whitespace tokens.
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 510;

pub struct RemoteChunkModel {
    endpoint: String,
    name: String,
    max_chunk_tokens: usize,
    timeout: Duration,
    credential: Option<ApiCredential>,
    client: reqwest::Client,
}

impl RemoteChunkModel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            name: endpoint.clone(),
            endpoint,
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            timeout: Duration::from_secs(60),
            credential: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_max_chunk_tokens(mut self, max: usize) -> Self {
        self.max_chunk_tokens = max.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Debug for RemoteChunkModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChunkModel")
            .field("endpoint", &self.endpoint)
            .field("max_chunk_tokens", &self.max_chunk_tokens)
            .field("credential", &self.credential)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreResponse {
    Wrapped { probabilities: Vec<[f64; 2]> },
    Bare(Vec<[f64; 2]>),
}

impl ScoreResponse {
    fn into_pairs(self) -> Vec<ProbabilityPair> {
        let raw = match self {
            ScoreResponse::Wrapped { probabilities } => probabilities,
            ScoreResponse::Bare(pairs) => pairs,
        };
        raw.into_iter()
            .map(|[authentic, manufactured]| ProbabilityPair::new(authentic, manufactured))
            .collect()
    }
}

#[async_trait]
impl ChunkModel for RemoteChunkModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    async fn score_chunks(&self, chunks: &[String]) -> Result<Vec<ProbabilityPair>, ClassifierError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ScoreRequest { inputs: chunks });
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout(self.timeout)
            } else {
                ClassifierError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Unavailable(format!(
                "inference endpoint returned {}",
                status
            )));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
        Ok(body.into_pairs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let wrapped: ScoreResponse =
            serde_json::from_str(r#"{"probabilities": [[0.8, 0.2], [0.4, 0.6]]}"#).unwrap();
        let pairs = wrapped.into_pairs();
        assert_eq!(pairs[1], ProbabilityPair::new(0.4, 0.6));

        let bare: ScoreResponse = serde_json::from_str(r#"[[0.5, 0.5]]"#).unwrap();
        assert_eq!(bare.into_pairs(), vec![ProbabilityPair::neutral()]);
    }

    #[test]
    fn test_tokenize_and_limits() {
        let model = RemoteChunkModel::new("http://localhost:9000/score").with_max_chunk_tokens(0);
        assert_eq!(model.max_chunk_tokens(), 1);
        assert_eq!(model.tokenize(" a  b\nc "), vec!["a", "b", "c"]);
    }
}
