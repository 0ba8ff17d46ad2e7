
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::embeddings::embedder::Embedder;
use crate::{KbError, Result};

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Failures are surfaced on the first attempt; there is no retry.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    endpoint: Url,
    model: String,
    api_key: String,
    batch_size: usize,
    agent: ureq::Agent,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                KbError::Config("OPENAI_API_KEY or DASHSCOPE_API_KEY must be set".to_string())
            })?;

        let model = config.model.trim();
        if model.is_empty() {
            return Err(KbError::Config("embedding model is not configured".to_string()));
        }

        let endpoint = config
            .base_url()?
            .join("embeddings")
            .map_err(|e| KbError::Config(format!("invalid embeddings endpoint: {e}")))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: model.to_string(),
            api_key,
            batch_size: usize::try_from(config.batch_size).unwrap_or(usize::MAX).max(1),
            agent,
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| KbError::Embedding(format!("failed to encode request: {e}")))?;

        debug!(
            "Requesting {} embeddings from {}",
            texts.len(),
            self.endpoint
        );

        let response_text = self
            .agent
            .post(self.endpoint.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|error| match error {
                ureq::Error::StatusCode(status) => {
                    warn!("Embedding provider returned HTTP {}", status);
                    KbError::Embedding(format!("provider returned HTTP {status}"))
                }
                other => {
                    warn!("Embedding request to {} failed: {}", self.endpoint, other);
                    KbError::Embedding(format!("request failed: {other}"))
                }
            })?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| KbError::Embedding(format!("malformed provider response: {e}")))?;

        order_by_index(response.data, texts.len())
    }
}

/// Restore input order from the provider's `index` fields and check the row
/// count.
fn order_by_index(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(KbError::Embedding(format!(
            "mismatch between request and response counts: {} vs {}",
            expected,
            data.len()
        )));
    }

    // either every row carries an index or none does
    let indexed = data.iter().filter(|row| row.index.is_some()).count();
    if indexed != 0 && indexed != data.len() {
        return Err(KbError::Embedding(format!(
            "provider returned an index for {} of {} rows",
            indexed,
            data.len()
        )));
    }
    if indexed == 0 {
        return Ok(data.into_iter().map(|row| row.embedding).collect());
    }

    data.sort_by_key(|row| row.index);

    for (position, row) in data.iter().enumerate() {
        if row.index.is_some_and(|index| index != position) {
            return Err(KbError::Embedding(format!(
                "provider returned out-of-range or duplicate index {:?}",
                row.index
            )));
        }
    }

    Ok(data.into_iter().map(|row| row.embedding).collect())
}

impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch)?);
        }

        if let Some(first) = vectors.first() {
            let width = first.len();
            if width == 0 || vectors.iter().any(|v| v.len() != width) {
                return Err(KbError::Embedding(
                    "provider returned vectors of inconsistent width".to_string(),
                ));
            }
        }

        debug!("Generated {} embeddings total", vectors.len());
        Ok(vectors)
    }
}
