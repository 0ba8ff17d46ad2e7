
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqliteExecutor};
use tracing::debug;

pub struct KnowledgeBaseQueries;

impl KnowledgeBaseQueries {
    /// Insert a knowledge base and assign its index path.
    ///
    /// The path depends on the generated id, so the row is inserted first and
    /// updated before the caller's transaction commits.
    #[inline]
    pub async fn create<F>(
        conn: &mut SqliteConnection,
        new_kb: &NewKnowledgeBase,
        index_path_for: F,
    ) -> Result<KnowledgeBase>
    where
        F: FnOnce(i64) -> String,
    {
        let now = Utc::now().naive_utc();
        let placeholder = format!("pending:{}", uuid::Uuid::new_v4().simple());

        let id = sqlx::query(
            r#"
            INSERT INTO knowledge_bases (owner_id, name, description, index_path, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_kb.owner_id)
        .bind(&new_kb.name)
        .bind(&new_kb.description)
        .bind(&placeholder)
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("Failed to create knowledge base")?
        .last_insert_rowid();

        let index_path = index_path_for(id);
        sqlx::query("UPDATE knowledge_bases SET index_path = ? WHERE id = ?")
            .bind(&index_path)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to assign knowledge base index path")?;

        debug!("Created knowledge base {} for owner {}", id, new_kb.owner_id);

        Ok(KnowledgeBase {
            id,
            owner_id: new_kb.owner_id,
            name: new_kb.name.clone(),
            description: new_kb.description.clone(),
            index_path,
            created_at: now,
        })
    }

    /// Look up a knowledge base only if it belongs to `owner_id`.
    #[inline]
    pub async fn get_owned<'e, E>(
        executor: E,
        owner_id: i64,
        id: i64,
    ) -> Result<Option<KnowledgeBase>>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query_as::<_, KnowledgeBase>(
            r#"
            SELECT id, owner_id, name, description, index_path, created_at
            FROM knowledge_bases WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(executor)
        .await
        .context("Failed to get knowledge base by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_owner<'e, E>(executor: E, owner_id: i64) -> Result<Vec<KnowledgeBase>>
    where
        E: SqliteExecutor<'e>,
    {
        let kbs = sqlx::query_as::<_, KnowledgeBase>(
            r#"
            SELECT id, owner_id, name, description, index_path, created_at
            FROM knowledge_bases WHERE owner_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(executor)
        .await
        .context("Failed to list knowledge bases")?;

        Ok(kbs)
    }

    /// Delete a knowledge base with all its documents and chunks, children
    /// first. Returns the number of documents removed, or `None` when the
    /// knowledge base did not exist.
    #[inline]
    pub async fn delete_with_contents(conn: &mut SqliteConnection, id: i64) -> Result<Option<u64>> {
        let chunks = sqlx::query(
            r#"
            DELETE FROM document_chunks
            WHERE document_id IN (SELECT id FROM documents WHERE kb_id = ?)
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to delete knowledge base chunks")?
        .rows_affected();

        let documents = sqlx::query("DELETE FROM documents WHERE kb_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete knowledge base documents")?
            .rows_affected();

        let kbs = sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete knowledge base")?
            .rows_affected();

        if kbs == 0 {
            return Ok(None);
        }

        debug!(
            "Deleted knowledge base {} ({} documents, {} chunks)",
            id, documents, chunks
        );
        Ok(Some(documents))
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a document together with its ordered chunk rows.
    #[inline]
    pub async fn create_with_chunks(
        conn: &mut SqliteConnection,
        new_document: &NewDocument,
        chunks: &[String],
    ) -> Result<Document> {
        let now = Utc::now().naive_utc();
        let chunk_count = i64::try_from(chunks.len()).context("Too many chunks")?;

        let id = sqlx::query(
            r#"
            INSERT INTO documents (kb_id, filename, file_path, chunk_count, uploaded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_document.kb_id)
        .bind(&new_document.filename)
        .bind(&new_document.file_path)
        .bind(chunk_count)
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        for (chunk_index, text) in (0_i64..).zip(chunks) {
            sqlx::query(
                "INSERT INTO document_chunks (document_id, chunk_index, text) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(chunk_index)
            .bind(text)
            .execute(&mut *conn)
            .await
            .context("Failed to create document chunk")?;
        }

        debug!("Created document {} with {} chunks", id, chunk_count);

        Ok(Document {
            id,
            kb_id: new_document.kb_id,
            filename: new_document.filename.clone(),
            file_path: new_document.file_path.clone(),
            chunk_count,
            uploaded_at: now,
        })
    }

    /// Look up a document only if its knowledge base belongs to `owner_id`.
    #[inline]
    pub async fn get_owned<'e, E>(executor: E, owner_id: i64, id: i64) -> Result<Option<Document>>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query_as::<_, Document>(
            r#"
            SELECT d.id, d.kb_id, d.filename, d.file_path, d.chunk_count, d.uploaded_at
            FROM documents d
            JOIN knowledge_bases kb ON kb.id = d.kb_id
            WHERE d.id = ? AND kb.owner_id = ?
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(executor)
        .await
        .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn get_by_filename<'e, E>(
        executor: E,
        kb_id: i64,
        filename: &str,
    ) -> Result<Option<Document>>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, kb_id, filename, file_path, chunk_count, uploaded_at
            FROM documents WHERE kb_id = ? AND filename = ?
            "#,
        )
        .bind(kb_id)
        .bind(filename)
        .fetch_optional(executor)
        .await
        .context("Failed to get document by filename")?;

        Ok(result)
    }

    #[inline]
    pub async fn filename_exists<'e, E>(executor: E, kb_id: i64, filename: &str) -> Result<bool>
    where
        E: SqliteExecutor<'e>,
    {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE kb_id = ? AND filename = ?)",
        )
        .bind(kb_id)
        .bind(filename)
        .fetch_one(executor)
        .await
        .context("Failed to check document filename")?;

        Ok(exists != 0)
    }

    /// Most recent first; documents uploaded in the same instant are ordered
    /// by descending id.
    #[inline]
    pub async fn list_summaries<'e, E>(executor: E, kb_id: i64) -> Result<Vec<DocumentSummary>>
    where
        E: SqliteExecutor<'e>,
    {
        let documents = sqlx::query_as::<_, DocumentSummary>(
            r#"
            SELECT id, filename, chunk_count, uploaded_at
            FROM documents WHERE kb_id = ?
            ORDER BY uploaded_at DESC, id DESC
            "#,
        )
        .bind(kb_id)
        .fetch_all(executor)
        .await
        .context("Failed to list documents")?;

        Ok(documents)
    }

    /// Delete a document and its chunk rows, chunks first. Returns the number
    /// of chunk rows removed, or `None` when the document did not exist.
    #[inline]
    pub async fn delete_with_chunks(conn: &mut SqliteConnection, id: i64) -> Result<Option<u64>> {
        let chunks = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete document chunks")?
            .rows_affected();

        let documents = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete document")?
            .rows_affected();

        if documents == 0 {
            return Ok(None);
        }

        debug!("Deleted document {} and {} chunks", id, chunks);
        Ok(Some(chunks))
    }

    /// Documents whose cached `chunk_count` differs from their chunk rows.
    #[inline]
    pub async fn chunk_count_mismatches<'e, E>(
        executor: E,
        kb_id: i64,
    ) -> Result<Vec<ChunkCountMismatch>>
    where
        E: SqliteExecutor<'e>,
    {
        let mismatches = sqlx::query_as::<_, ChunkCountMismatch>(
            r#"
            SELECT d.id AS document_id,
                   d.filename,
                   d.chunk_count AS recorded,
                   COUNT(c.id) AS actual
            FROM documents d
            LEFT JOIN document_chunks c ON c.document_id = d.id
            WHERE d.kb_id = ?
            GROUP BY d.id, d.filename, d.chunk_count
            HAVING d.chunk_count != COUNT(c.id)
            ORDER BY d.id
            "#,
        )
        .bind(kb_id)
        .fetch_all(executor)
        .await
        .context("Failed to compare document chunk counts")?;

        Ok(mismatches)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    #[inline]
    pub async fn list_for_document<'e, E>(
        executor: E,
        document_id: i64,
    ) -> Result<Vec<DocumentChunk>>
    where
        E: SqliteExecutor<'e>,
    {
        let chunks = sqlx::query_as::<_, DocumentChunk>(
            r#"
            SELECT id, document_id, chunk_index, text
            FROM document_chunks WHERE document_id = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(executor)
        .await
        .context("Failed to list document chunks")?;

        Ok(chunks)
    }

    /// Every chunk text of a knowledge base in index order: by document id,
    /// then chunk index.
    #[inline]
    pub async fn texts_for_kb<'e, E>(executor: E, kb_id: i64) -> Result<Vec<String>>
    where
        E: SqliteExecutor<'e>,
    {
        let texts = sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.text
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.kb_id = ?
            ORDER BY c.document_id, c.chunk_index
            "#,
        )
        .bind(kb_id)
        .fetch_all(executor)
        .await
        .context("Failed to list knowledge base chunk texts")?;

        Ok(texts)
    }

    /// Same ordering as [`Self::texts_for_kb`], with document details.
    #[inline]
    pub async fn indexed_chunks_for_kb<'e, E>(executor: E, kb_id: i64) -> Result<Vec<IndexedChunk>>
    where
        E: SqliteExecutor<'e>,
    {
        let chunks = sqlx::query_as::<_, IndexedChunk>(
            r#"
            SELECT c.document_id, d.filename, c.chunk_index, c.text
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.kb_id = ?
            ORDER BY c.document_id, c.chunk_index
            "#,
        )
        .bind(kb_id)
        .fetch_all(executor)
        .await
        .context("Failed to list knowledge base chunks")?;

        Ok(chunks)
    }

    #[inline]
    pub async fn count_for_kb<'e, E>(executor: E, kb_id: i64) -> Result<i64>
    where
        E: SqliteExecutor<'e>,
    {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.kb_id = ?
            "#,
        )
        .bind(kb_id)
        .fetch_one(executor)
        .await
        .context("Failed to count knowledge base chunks")?;

        Ok(count)
    }
}
