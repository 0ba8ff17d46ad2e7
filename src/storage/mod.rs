// Raw file storage
// Uploaded bytes and index files, laid out per owner and knowledge base


use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::config::Config;
use crate::{KbError, Result};

/// Where index files and uploads live on disk.
///
/// Every path embeds the owner id, so two owners never share a file even
/// when their knowledge base ids collide across deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    index_root: PathBuf,
    upload_root: PathBuf,
}

impl StorageLayout {
    #[inline]
    pub fn new(index_root: impl Into<PathBuf>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            index_root: index_root.into(),
            upload_root: upload_root.into(),
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.index_root(), config.upload_root())
    }

    #[inline]
    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    #[inline]
    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// `{index_root}/user_{owner}/kb_{kb}.index`
    #[inline]
    pub fn kb_index_path(&self, owner_id: i64, kb_id: i64) -> PathBuf {
        self.index_root
            .join(format!("user_{owner_id}"))
            .join(format!("kb_{kb_id}.index"))
    }

    /// `{upload_root}/user_{owner}/kb_{kb}`
    #[inline]
    pub fn kb_upload_dir(&self, owner_id: i64, kb_id: i64) -> PathBuf {
        self.upload_root
            .join(format!("user_{owner_id}"))
            .join(format!("kb_{kb_id}"))
    }

    /// Upload location for `filename`, reduced to its base name.
    #[inline]
    pub fn upload_path(&self, owner_id: i64, kb_id: i64, filename: &str) -> Result<PathBuf> {
        let name = upload_basename(filename)?;
        Ok(self.kb_upload_dir(owner_id, kb_id).join(name))
    }
}

/// Strip any directory components from a client-supplied filename.
///
/// Both `/` and `\` count as separators. The base name is kept verbatim,
/// surrounding whitespace included, so `" a.txt"` and `"a.txt"` are distinct
/// documents. Blank names, `.` and `..` are rejected.
#[inline]
pub fn upload_basename(filename: &str) -> Result<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    if name.trim().is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(KbError::validation(format!(
            "invalid upload filename: {filename:?}"
        )));
    }

    Ok(name.to_string())
}

/// Extension of `filename` including the leading dot, or an empty string.
#[inline]
pub fn file_suffix(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Stream `reader` into `path`, creating parent directories as needed.
/// Returns the number of bytes written.
#[inline]
pub async fn save_upload<R>(path: &Path, reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);
    let written = tokio::io::copy(reader, &mut writer).await?;
    writer.flush().await?;

    debug!("Stored {} bytes at {}", written, path.display());
    Ok(written)
}

/// Decode uploaded bytes as UTF-8, falling back to GBK with undecodable
/// sequences dropped.
#[inline]
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(_) => {
            debug!("Upload is not valid UTF-8, decoding as GBK");
            let (text, _) = encoding_rs::GBK.decode_without_bom_handling(bytes);
            text.chars().filter(|c| *c != char::REPLACEMENT_CHARACTER).collect()
        }
    }
}

/// Delete a file, treating absence as success. Other failures are logged,
/// never returned.
#[inline]
pub fn remove_file_if_exists(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Recursively delete a directory, treating absence as success. Other
/// failures are logged, never returned.
#[inline]
pub fn remove_dir_if_exists(path: &Path) -> bool {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed directory {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove directory {}: {}", path.display(), e);
            false
        }
    }
}
