// Consistency validation
// Compares chunk rows in SQLite with the vectors in a knowledge base's index

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::IndexStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{ChunkCountMismatch, KnowledgeBase};
use crate::database::sqlite::queries::{ChunkQueries, DocumentQueries};

/// Consistency check results for one knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub kb_id: i64,
    /// Chunk rows of live documents
    pub chunk_rows: usize,
    /// Vectors in the index file
    pub indexed_vectors: usize,
    /// Documents whose cached chunk count disagrees with their rows
    pub documents_with_bad_counts: Vec<ChunkCountMismatch>,
    pub is_consistent: bool,
}

pub struct ConsistencyValidator<'a> {
    database: &'a Database,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database) -> Self {
        Self { database }
    }

    #[inline]
    pub async fn validate(&self, kb: &KnowledgeBase) -> Result<ConsistencyReport> {
        debug!("Checking consistency of knowledge base {}", kb.id);

        let chunk_rows = ChunkQueries::count_for_kb(self.database.pool(), kb.id).await?;
        let chunk_rows = usize::try_from(chunk_rows).unwrap_or_default();
        let indexed_vectors = IndexStore::vector_count(Path::new(&kb.index_path)).await?;
        let documents_with_bad_counts =
            DocumentQueries::chunk_count_mismatches(self.database.pool(), kb.id).await?;

        let is_consistent = chunk_rows == indexed_vectors && documents_with_bad_counts.is_empty();

        let report = ConsistencyReport {
            kb_id: kb.id,
            chunk_rows,
            indexed_vectors,
            documents_with_bad_counts,
            is_consistent,
        };

        if report.is_consistent {
            info!(
                "Knowledge base {} is consistent ({} chunks)",
                kb.id, report.chunk_rows
            );
        } else {
            warn!("Knowledge base {} has consistency issues", kb.id);
            log_consistency_issues(&report);
        }

        Ok(report)
    }
}

fn log_consistency_issues(report: &ConsistencyReport) {
    if report.chunk_rows != report.indexed_vectors {
        warn!(
            "  {} chunk rows but {} indexed vectors",
            report.chunk_rows, report.indexed_vectors
        );
    }
    for mismatch in &report.documents_with_bad_counts {
        warn!("  {}", mismatch);
    }
}
