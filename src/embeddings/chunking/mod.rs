
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{KbError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Configuration for content chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum window length in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent windows
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KbError::validation("chunk_size must be > 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(KbError::validation(format!(
                "chunk_overlap ({}) must be < chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        chunk_text(text, self.chunk_size, self.chunk_overlap)
    }
}

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// The text is trimmed first. Every window is trimmed as well and dropped if
/// nothing is left, but iteration continues past it. The next window starts
/// `chunk_overlap` characters before the previous one ended, and iteration
/// stops after the window that reaches the final character.
///
/// Lengths are counted in `char`s, so multi-byte text is never split inside a
/// code point.
#[inline]
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    ChunkingConfig {
        chunk_size,
        chunk_overlap,
    }
    .validate()?;

    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < len {
        let end = len.min(start + chunk_size);
        let window: String = chars[start..end].iter().collect();
        let window = window.trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }
        if end == len {
            break;
        }
        // overlap < chunk_size, so this is always past `start`
        start = end.saturating_sub(chunk_overlap);
    }

    debug!(
        "Chunked {} characters into {} chunks (size {}, overlap {})",
        len,
        chunks.len(),
        chunk_size,
        chunk_overlap
    );

    Ok(chunks)
}
