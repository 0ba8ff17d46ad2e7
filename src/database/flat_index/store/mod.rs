#[cfg(test)]
mod tests;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{FlatIndex, SearchHit};
use crate::embeddings::Embedder;
use crate::{KbError, Result};

/// Reads and writes per-knowledge-base index files and embeds text on their
/// behalf.
///
/// A missing, zero-length or unreadable file is treated as an empty index.
/// Writes go to a temporary file in the target directory which is then
/// renamed over the target, so readers see either the old or the new index.
#[derive(Debug, Clone)]
pub struct IndexStore {
    embedder: Arc<dyn Embedder>,
}

impl IndexStore {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    #[inline]
    pub fn load(path: &Path) -> Option<FlatIndex> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read index {}: {}", path.display(), e);
                return None;
            }
        };

        if bytes.is_empty() {
            return None;
        }

        match FlatIndex::decode(&bytes) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(
                    "Index {} is unreadable, treating it as empty: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    #[inline]
    pub fn save(index: &FlatIndex, path: &Path) -> Result<()> {
        let bytes = index.encode()?;
        write_atomically(path, &bytes)?;
        debug!(
            "Saved index with {} vectors (dim {}) to {}",
            index.len(),
            index.dimension(),
            path.display()
        );
        Ok(())
    }

    /// Write a zero-length placeholder unless a file already exists.
    #[inline]
    pub fn create_empty(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append `vectors` to `existing`, starting a fresh index when there is
    /// none or its dimension differs from the batch.
    #[inline]
    pub fn add(existing: Option<FlatIndex>, vectors: &[Vec<f32>]) -> Result<FlatIndex> {
        let Some(first) = vectors.first() else {
            return Ok(existing.unwrap_or_else(|| FlatIndex::new(0)));
        };
        let dimension = first.len();

        let mut index = match existing {
            Some(index) if index.dimension() == dimension => index,
            Some(index) => {
                warn!(
                    "Replacing index of dimension {} with dimension {}",
                    index.dimension(),
                    dimension
                );
                FlatIndex::new(dimension)
            }
            None => FlatIndex::new(dimension),
        };

        index.add(vectors)?;
        Ok(index)
    }

    #[inline]
    pub fn count(path: &Path) -> usize {
        Self::load(path).map_or(0, |index| index.len())
    }

    /// Replace the index at `path` with embeddings of `texts`, skipping blank
    /// entries. Returns the number of vectors written.
    #[inline]
    pub async fn rebuild(&self, path: &Path, texts: Vec<String>) -> Result<usize> {
        let embedder = Arc::clone(&self.embedder);
        let path = path.to_path_buf();

        run_blocking(move || {
            let texts: Vec<String> = texts
                .into_iter()
                .filter(|text| !text.trim().is_empty())
                .collect();

            if texts.is_empty() {
                write_atomically(&path, &[])?;
                info!("Rebuilt empty index at {}", path.display());
                return Ok(0);
            }

            let vectors = embed_checked(embedder.as_ref(), &texts)?;
            let index = Self::add(None, &vectors)?;
            Self::save(&index, &path)?;

            info!(
                "Rebuilt index at {} with {} vectors",
                path.display(),
                index.len()
            );
            Ok(index.len())
        })
        .await
    }

    /// Embed `texts` and append them to the index at `path`.
    ///
    /// When the embeddings are wider or narrower than the stored index, the
    /// old vectors are dropped and `replaced` is set; the caller must rebuild
    /// to restore them.
    #[inline]
    pub async fn append(&self, path: &Path, texts: Vec<String>) -> Result<IndexAppend> {
        if texts.is_empty() {
            return Ok(IndexAppend::default());
        }

        let embedder = Arc::clone(&self.embedder);
        let path = path.to_path_buf();

        run_blocking(move || {
            let vectors = embed_checked(embedder.as_ref(), &texts)?;
            let existing = Self::load(&path);

            let (before, replaced) = match (&existing, vectors.first()) {
                (Some(index), Some(first)) if index.dimension() == first.len() => {
                    (index.len(), false)
                }
                (Some(index), _) => (0, !index.is_empty()),
                (None, _) => (0, false),
            };

            let index = Self::add(existing, &vectors)?;
            Self::save(&index, &path)?;

            let added = index.len().saturating_sub(before);
            debug!("Appended {} vectors to {}", added, path.display());
            Ok(IndexAppend { added, replaced })
        })
        .await
    }

    /// Vector count of the index at `path`, read off the async runtime.
    #[inline]
    pub async fn vector_count(path: &Path) -> Result<usize> {
        let path = path.to_path_buf();
        run_blocking(move || Ok(Self::count(&path))).await
    }

    /// Embed `query` and rank the vectors stored at `path` against it.
    #[inline]
    pub async fn search(&self, path: &Path, query: String, k: usize) -> Result<IndexSearch> {
        let embedder = Arc::clone(&self.embedder);
        let path: PathBuf = path.to_path_buf();

        run_blocking(move || {
            let Some(index) = Self::load(&path) else {
                return Ok(IndexSearch::default());
            };
            if index.is_empty() {
                return Ok(IndexSearch::default());
            }

            let query = [query];
            let vectors = embed_checked(embedder.as_ref(), &query)?;
            let hits = match vectors.first() {
                Some(vector) => index.search(vector, k)?,
                None => Vec::new(),
            };

            Ok(IndexSearch {
                indexed: index.len(),
                hits,
            })
        })
        .await
    }
}

/// Result of [`IndexStore::append`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexAppend {
    /// Vectors the index gained
    pub added: usize,
    /// Whether a dimension change discarded the previously stored vectors
    pub replaced: bool,
}

/// Hits of one search along with the size of the index that produced them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSearch {
    pub indexed: usize,
    pub hits: Vec<SearchHit>,
}

fn embed_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(KbError::Embedding(format!(
            "{} returned {} vectors for {} texts",
            embedder.name(),
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| KbError::Io(e.error))?;
    Ok(())
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| KbError::Other(anyhow::anyhow!("Index task failed: {e}")))?
}
