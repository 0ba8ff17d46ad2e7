// Flat vector index
// One file per knowledge base, searched exhaustively


pub mod store;

pub use store::{IndexAppend, IndexSearch, IndexStore};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::{KbError, Result};

const INDEX_MAGIC: [u8; 4] = *b"KBFX";
const INDEX_FORMAT_VERSION: u16 = 1;

/// Ordered, fixed-width vectors. A vector's position is its only identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    /// Row-major storage, `len() * dimension` values
    data: Vec<f32>,
}

/// A stored vector ranked against a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    /// Squared Euclidean distance
    pub distance: f32,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append rows in order. Every row must match the index dimension; on
    /// error nothing is appended.
    #[inline]
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(KbError::Embedding(format!(
                "vector width {} does not match index dimension {}",
                bad.len(),
                self.dimension
            )));
        }
        if self.dimension == 0 && !vectors.is_empty() {
            return Err(KbError::Embedding(
                "cannot store zero-width vectors".to_string(),
            ));
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        if self.dimension == 0 || end > self.data.len() {
            return None;
        }
        self.data.get(start..end)
    }

    /// Compare `query` against every stored vector and return the `k`
    /// closest, nearest first. Equal distances keep insertion order.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(KbError::Embedding(format!(
                "query width {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = (0..self.len())
            .filter_map(|position| {
                self.vector(position).map(|vector| SearchHit {
                    position,
                    distance: squared_l2(query, vector),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize with the file header.
    #[inline]
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::DefaultOptions::new()
            .serialize(&(INDEX_MAGIC, INDEX_FORMAT_VERSION, self))
            .map_err(|e| KbError::Other(anyhow::anyhow!("Failed to encode index: {e}")))
    }

    /// Parse bytes written by [`FlatIndex::encode`]. Any mismatch in header,
    /// version or shape is an error.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let limit = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let (magic, version, index): ([u8; 4], u16, Self) = bincode::DefaultOptions::new()
            .with_limit(limit)
            .deserialize(bytes)
            .map_err(|e| KbError::Other(anyhow::anyhow!("Failed to decode index: {e}")))?;

        if magic != INDEX_MAGIC {
            return Err(KbError::Other(anyhow::anyhow!("Not an index file")));
        }
        if version != INDEX_FORMAT_VERSION {
            return Err(KbError::Other(anyhow::anyhow!(
                "Unsupported index format version {version}"
            )));
        }
        if index.dimension == 0 || index.data.len() % index.dimension != 0 {
            return Err(KbError::Other(anyhow::anyhow!(
                "Index body does not match its dimension"
            )));
        }

        Ok(index)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
