
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct KnowledgeBase {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    /// Location of the flat vector index for this knowledge base
    pub index_path: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKnowledgeBase {
    pub owner_id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub kb_id: i64,
    pub filename: String,
    pub file_path: String,
    pub chunk_count: i64,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub kb_id: i64,
    pub filename: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub text: String,
}

/// Listing view of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentSummary {
    pub id: i64,
    pub filename: String,
    pub chunk_count: i64,
    pub uploaded_at: NaiveDateTime,
}

/// A chunk joined with the document that owns it, in index order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IndexedChunk {
    pub document_id: i64,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
}

/// A document whose cached `chunk_count` disagrees with its chunk rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkCountMismatch {
    pub document_id: i64,
    pub filename: String,
    pub recorded: i64,
    pub actual: i64,
}

impl std::fmt::Display for ChunkCountMismatch {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (id {}): recorded {} chunks, found {}",
            self.filename, self.document_id, self.recorded, self.actual
        )
    }
}
