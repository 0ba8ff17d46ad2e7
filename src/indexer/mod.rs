// Indexer module
// Keeps uploaded files, chunk rows and per-knowledge-base vector indexes in step

pub mod consistency;
pub mod locks;


use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::IndexStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    Document, DocumentSummary, KnowledgeBase, NewDocument, NewKnowledgeBase,
};
use crate::database::sqlite::queries::{ChunkQueries, DocumentQueries, KnowledgeBaseQueries};
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::{Embedder, create_embedder};
use crate::storage::{self, StorageLayout};
use crate::{KbError, Result};

pub use consistency::{ConsistencyReport, ConsistencyValidator};
pub use locks::KbLocks;

pub const MAX_KB_NAME_CHARS: usize = 100;

/// What to do when an upload's name matches an existing document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Store the upload under a fresh random name with the same extension
    #[default]
    Keep,
    /// Swap out the existing document for the upload
    Replace,
}

impl FromStr for ConflictPolicy {
    type Err = KbError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(Self::Keep),
            "replace" => Ok(Self::Replace),
            other => Err(KbError::validation(format!(
                "unknown conflict policy '{other}', expected 'keep' or 'replace'"
            ))),
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ConflictPolicy::Keep => write!(f, "keep"),
            ConflictPolicy::Replace => write!(f, "replace"),
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub document_id: i64,
    pub kb_id: i64,
    /// Name the document was stored under, which differs from the upload
    /// name when a conflict was kept
    pub filename: String,
    pub chunk_count: usize,
    /// Vectors written to the index by this upload
    pub vectors_indexed: usize,
    pub uploaded_at: NaiveDateTime,
}

/// A chunk ranked against a search query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMatch {
    pub document_id: i64,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    /// Squared Euclidean distance, lower is closer
    pub distance: f32,
}

/// Entry point for every knowledge-base operation.
///
/// Each knowledge base has a single flat index whose vector positions line up
/// with its chunk rows ordered by document id then chunk index. Mutations
/// hold that knowledge base's lock for their whole duration so the alignment
/// is never observed half-written by another mutation.
#[derive(Debug, Clone)]
pub struct Indexer {
    database: Database,
    index_store: IndexStore,
    chunking: ChunkingConfig,
    layout: StorageLayout,
    locks: Arc<KbLocks>,
}

impl Indexer {
    #[inline]
    pub fn new(
        database: Database,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        layout: StorageLayout,
    ) -> Result<Self> {
        chunking.validate()?;

        Ok(Self {
            database,
            index_store: IndexStore::new(embedder),
            chunking,
            layout,
            locks: Arc::new(KbLocks::new()),
        })
    }

    /// Open the metadata database and build the configured embedder.
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let database = Database::open(&config.database_path()).await?;
        let embedder = create_embedder(&config.embedding)?;

        Self::new(
            database,
            embedder,
            config.chunking,
            StorageLayout::from_config(config),
        )
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Create a knowledge base along with its empty index file. If the file
    /// cannot be created the row is rolled back.
    #[inline]
    pub async fn create_knowledge_base(
        &self,
        owner_id: i64,
        name: &str,
        description: &str,
    ) -> Result<KnowledgeBase> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KbError::validation("knowledge base name must not be blank"));
        }
        if name.chars().count() > MAX_KB_NAME_CHARS {
            return Err(KbError::validation(format!(
                "knowledge base name must be at most {MAX_KB_NAME_CHARS} characters"
            )));
        }

        let new_kb = NewKnowledgeBase {
            owner_id,
            name: name.to_string(),
            description: description.to_string(),
        };

        let mut transaction = self.database.begin().await?;
        let kb = KnowledgeBaseQueries::create(&mut *transaction, &new_kb, |id| {
            self.layout
                .kb_index_path(owner_id, id)
                .to_string_lossy()
                .into_owned()
        })
        .await?;

        // dropping the transaction on error rolls the row back
        IndexStore::create_empty(Path::new(&kb.index_path))?;
        transaction.commit().await?;

        info!(
            "Created knowledge base {} '{}' for owner {}",
            kb.id, kb.name, owner_id
        );
        Ok(kb)
    }

    /// Newest first
    #[inline]
    pub async fn list_knowledge_bases(&self, owner_id: i64) -> Result<Vec<KnowledgeBase>> {
        Ok(KnowledgeBaseQueries::list_by_owner(self.database.pool(), owner_id).await?)
    }

    #[inline]
    pub async fn get_knowledge_base(&self, owner_id: i64, kb_id: i64) -> Result<KnowledgeBase> {
        KnowledgeBaseQueries::get_owned(self.database.pool(), owner_id, kb_id)
            .await?
            .ok_or_else(|| KbError::not_found(format!("knowledge base {kb_id}")))
    }

    /// Delete a knowledge base, its documents and chunks, its index file and
    /// its upload directory.
    #[inline]
    pub async fn delete_knowledge_base(&self, owner_id: i64, kb_id: i64) -> Result<()> {
        let _guard = self.locks.acquire(kb_id).await;
        let kb = self.get_knowledge_base(owner_id, kb_id).await?;

        let mut transaction = self.database.begin().await?;
        let documents = KnowledgeBaseQueries::delete_with_contents(&mut *transaction, kb.id)
            .await?
            .ok_or_else(|| KbError::not_found(format!("knowledge base {kb_id}")))?;
        transaction.commit().await?;

        storage::remove_file_if_exists(Path::new(&kb.index_path));
        storage::remove_dir_if_exists(&self.layout.kb_upload_dir(owner_id, kb.id));

        info!(
            "Deleted knowledge base {} with {} documents",
            kb.id, documents
        );
        Ok(())
    }

    /// Store, chunk, persist and index one uploaded document.
    ///
    /// The bytes are staged next to their final location and only moved into
    /// place once they yield at least one chunk, so a rejected upload never
    /// disturbs an existing file of the same name.
    #[inline]
    pub async fn upload_document<R>(
        &self,
        owner_id: i64,
        kb_id: i64,
        filename: &str,
        reader: &mut R,
        policy: ConflictPolicy,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let _guard = self.locks.acquire(kb_id).await;
        let kb = self.get_knowledge_base(owner_id, kb_id).await?;
        let original_name = storage::upload_basename(filename)?;

        // Name conflict
        let existing =
            DocumentQueries::get_by_filename(self.database.pool(), kb.id, &original_name).await?;
        let (stored_name, replaced) = match (existing, policy) {
            (None, _) => (original_name, None),
            (Some(_), ConflictPolicy::Keep) => {
                let renamed = self.unused_filename(kb.id, &original_name).await?;
                debug!(
                    "'{}' already exists in knowledge base {}, keeping both as '{}'",
                    original_name, kb.id, renamed
                );
                (renamed, None)
            }
            (Some(document), ConflictPolicy::Replace) => {
                debug!(
                    "Replacing document {} '{}' in knowledge base {}",
                    document.id, document.filename, kb.id
                );
                (original_name, Some(document))
            }
        };

        // Store bytes
        let upload_path = self.layout.upload_path(owner_id, kb.id, &stored_name)?;
        let staging_path = staging_path_for(&upload_path);
        let stored = storage::save_upload(&staging_path, reader).await;
        if let Err(e) = stored {
            storage::remove_file_if_exists(&staging_path);
            return Err(e);
        }

        // Decode and chunk
        let text = match tokio::fs::read(&staging_path).await {
            Ok(bytes) => storage::decode_text(&bytes),
            Err(e) => {
                storage::remove_file_if_exists(&staging_path);
                return Err(e.into());
            }
        };
        let chunks = self.chunking.chunk(&text)?;
        if chunks.is_empty() {
            storage::remove_file_if_exists(&staging_path);
            return Err(KbError::validation(format!(
                "'{stored_name}' contains no usable text"
            )));
        }
        tokio::fs::rename(&staging_path, &upload_path).await?;

        // Persist rows
        let new_document = NewDocument {
            kb_id: kb.id,
            filename: stored_name,
            file_path: upload_path.to_string_lossy().into_owned(),
        };
        let mut transaction = self.database.begin().await?;
        if let Some(old) = &replaced {
            DocumentQueries::delete_with_chunks(&mut *transaction, old.id).await?;
        }
        let document =
            DocumentQueries::create_with_chunks(&mut *transaction, &new_document, &chunks).await?;
        transaction.commit().await?;

        // Update index
        let index_path = PathBuf::from(&kb.index_path);
        let expected = chunks.len();
        let vectors_indexed = match &replaced {
            Some(old) => {
                if upload_path.as_path() != Path::new(&old.file_path) {
                    storage::remove_file_if_exists(Path::new(&old.file_path));
                }
                self.rebuild_aligned(&kb).await?
            }
            None => {
                let appended = self.index_store.append(&index_path, chunks).await?;
                if appended.replaced {
                    warn!(
                        "Embedding width changed, re-indexing all chunks of knowledge base {}",
                        kb.id
                    );
                    self.rebuild_aligned(&kb).await?
                } else if appended.added != expected {
                    warn!(
                        "Indexed {} vectors for {} new chunks in knowledge base {}",
                        appended.added, expected, kb.id
                    );
                    return Err(KbError::StorageInconsistency {
                        expected,
                        actual: appended.added,
                    });
                } else {
                    appended.added
                }
            }
        };

        info!(
            "Uploaded '{}' to knowledge base {} as document {} ({} chunks)",
            document.filename, kb.id, document.id, expected
        );

        Ok(UploadOutcome {
            document_id: document.id,
            kb_id: kb.id,
            filename: document.filename,
            chunk_count: expected,
            vectors_indexed,
            uploaded_at: document.uploaded_at,
        })
    }

    /// Delete a document with its chunks and stored file, then rebuild the
    /// knowledge base's index from the remaining chunks.
    #[inline]
    pub async fn delete_document(&self, owner_id: i64, document_id: i64) -> Result<()> {
        let document = self.owned_document(owner_id, document_id).await?;
        let _guard = self.locks.acquire(document.kb_id).await;

        // it may have gone while we waited
        let document = self.owned_document(owner_id, document_id).await?;
        let kb = self.get_knowledge_base(owner_id, document.kb_id).await?;

        let mut transaction = self.database.begin().await?;
        DocumentQueries::delete_with_chunks(&mut *transaction, document.id)
            .await?
            .ok_or_else(|| KbError::not_found(format!("document {document_id}")))?;
        transaction.commit().await?;

        storage::remove_file_if_exists(Path::new(&document.file_path));

        let written = self.rebuild_aligned(&kb).await?;
        info!(
            "Deleted document {} from knowledge base {}, index now holds {} vectors",
            document.id, kb.id, written
        );
        Ok(())
    }

    /// Most recent first
    #[inline]
    pub async fn list_documents(&self, owner_id: i64, kb_id: i64) -> Result<Vec<DocumentSummary>> {
        let kb = self.get_knowledge_base(owner_id, kb_id).await?;
        Ok(DocumentQueries::list_summaries(self.database.pool(), kb.id).await?)
    }

    /// Re-embed every chunk row and replace the index. Returns the number of
    /// vectors written.
    #[inline]
    pub async fn rebuild_knowledge_base(&self, owner_id: i64, kb_id: i64) -> Result<usize> {
        let _guard = self.locks.acquire(kb_id).await;
        let kb = self.get_knowledge_base(owner_id, kb_id).await?;
        let written = self.rebuild_aligned(&kb).await?;
        info!(
            "Rebuilt index of knowledge base {} with {} vectors",
            kb.id, written
        );
        Ok(written)
    }

    #[inline]
    pub async fn check_consistency(&self, owner_id: i64, kb_id: i64) -> Result<ConsistencyReport> {
        let _guard = self.locks.acquire(kb_id).await;
        let kb = self.get_knowledge_base(owner_id, kb_id).await?;
        ConsistencyValidator::new(&self.database).validate(&kb).await
    }

    /// The `k` chunks closest to `query`, nearest first.
    ///
    /// Refuses to answer when the index and the chunk rows disagree in
    /// length, since positions could then point at the wrong chunks.
    #[inline]
    pub async fn search(
        &self,
        owner_id: i64,
        kb_id: i64,
        query: &str,
        k: usize,
    ) -> Result<Vec<ChunkMatch>> {
        if k == 0 {
            return Err(KbError::validation("k must be > 0"));
        }
        if query.trim().is_empty() {
            return Err(KbError::validation("query must not be blank"));
        }

        let _guard = self.locks.acquire(kb_id).await;
        let kb = self.get_knowledge_base(owner_id, kb_id).await?;
        let chunks = ChunkQueries::indexed_chunks_for_kb(self.database.pool(), kb.id).await?;

        let result = self
            .index_store
            .search(Path::new(&kb.index_path), query.to_string(), k)
            .await?;

        if result.indexed != chunks.len() {
            warn!(
                "Knowledge base {} has {} chunk rows but {} indexed vectors",
                kb.id,
                chunks.len(),
                result.indexed
            );
            return Err(KbError::StorageInconsistency {
                expected: chunks.len(),
                actual: result.indexed,
            });
        }

        let matches: Vec<ChunkMatch> = result
            .hits
            .into_iter()
            .filter_map(|hit| {
                chunks.get(hit.position).map(|chunk| ChunkMatch {
                    document_id: chunk.document_id,
                    filename: chunk.filename.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    distance: hit.distance,
                })
            })
            .collect();

        debug!(
            "Search in knowledge base {} returned {} matches",
            kb.id,
            matches.len()
        );
        Ok(matches)
    }

    async fn owned_document(
        &self,
        owner_id: i64,
        document_id: i64,
    ) -> Result<Document> {
        DocumentQueries::get_owned(self.database.pool(), owner_id, document_id)
            .await?
            .ok_or_else(|| KbError::not_found(format!("document {document_id}")))
    }

    /// Rebuild the index and fail unless it ends up with one vector per
    /// chunk row.
    async fn rebuild_aligned(&self, kb: &KnowledgeBase) -> Result<usize> {
        let texts = ChunkQueries::texts_for_kb(self.database.pool(), kb.id).await?;
        let expected = texts.len();
        let written = self
            .index_store
            .rebuild(Path::new(&kb.index_path), texts)
            .await?;
        if written != expected {
            warn!(
                "Rebuild of knowledge base {} wrote {} vectors for {} chunks",
                kb.id, written, expected
            );
            return Err(KbError::StorageInconsistency {
                expected,
                actual: written,
            });
        }
        Ok(written)
    }

    /// `{uuid}{.ext}`, drawn until no document in the knowledge base uses it.
    async fn unused_filename(&self, kb_id: i64, original: &str) -> Result<String> {
        let suffix = storage::file_suffix(original);
        loop {
            let candidate = format!("{}{}", Uuid::new_v4().simple(), suffix);
            if !DocumentQueries::filename_exists(self.database.pool(), kb_id, &candidate).await? {
                return Ok(candidate);
            }
        }
    }
}

/// `.{uuid}.part` beside the final upload. The stored name is left out so a
/// name that fits the filesystem's limit never overflows it while staged.
fn staging_path_for(upload_path: &Path) -> PathBuf {
    upload_path.with_file_name(format!(".{}.part", Uuid::new_v4().simple()))
}
