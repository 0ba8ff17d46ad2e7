
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::embeddings::openai::OpenAiEmbedder;
use crate::{KbError, Result};

/// Maps chunk texts to fixed-width vectors.
///
/// Implementations must return exactly one row per input text, in input
/// order, and every row of one call must have the same width. Calls may
/// block; async callers should run them on a blocking thread.
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the embedding strategy named by the configuration.
///
/// The live backend reads its credentials from `OPENAI_API_KEY`, falling back
/// to `DASHSCOPE_API_KEY`.
#[inline]
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    config.validate()?;

    let embedder: Arc<dyn Embedder> = match config.backend {
        EmbeddingBackend::Deterministic => Arc::new(DeterministicEmbedder::new(
            usize::try_from(config.dimension)
                .map_err(|_| KbError::Config("embedding dimension too large".to_string()))?,
        )?),
        EmbeddingBackend::Live => {
            let live = OpenAiEmbedder::new(config, api_key_from_env())?;
            info!("Embedding with model {} at {}", live.model(), live.endpoint());
            Arc::new(live)
        }
    };

    debug!("Using {} embedding backend", embedder.name());
    Ok(embedder)
}

fn api_key_from_env() -> Option<String> {
    ["OPENAI_API_KEY", "DASHSCOPE_API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Derives vectors from a SHA-256 of the text, so identical texts always map
/// to identical vectors and no network is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterministicEmbedder {
    dimension: usize,
}

impl DeterministicEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(KbError::Config(
                "deterministic embedding dimension must be > 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut block: u32 = 0;

        // each digest yields 32 components; chain blocks for wider vectors
        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(block.to_le_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();

            let remaining = self.dimension - vector.len();
            vector.extend(
                digest
                    .iter()
                    .take(remaining)
                    .map(|byte| f32::from(*byte) / 255.0),
            );
            block += 1;
        }

        vector
    }
}

impl Embedder for DeterministicEmbedder {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}
