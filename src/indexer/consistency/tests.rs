use super::*;
use crate::database::sqlite::models::{NewDocument, NewKnowledgeBase};
use crate::database::sqlite::queries::KnowledgeBaseQueries;
use crate::embeddings::DeterministicEmbedder;
use std::sync::Arc;
use tempfile::TempDir;

async fn setup(chunks: &[&str]) -> (TempDir, Database, KnowledgeBase) {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let database = Database::open(&temp_dir.path().join("metadata.db"))
        .await
        .expect("should open database");
    let index_path = temp_dir.path().join("kb.index");

    let mut tx = database.begin().await.expect("should begin");
    let kb = KnowledgeBaseQueries::create(
        &mut *tx,
        &NewKnowledgeBase {
            owner_id: 1,
            name: "Notes".to_string(),
            description: String::new(),
        },
        |_| index_path.to_string_lossy().into_owned(),
    )
    .await
    .expect("should create kb");
    let chunks: Vec<String> = chunks.iter().map(|c| (*c).to_string()).collect();
    DocumentQueries::create_with_chunks(
        &mut *tx,
        &NewDocument {
            kb_id: kb.id,
            filename: "a.txt".to_string(),
            file_path: "/uploads/a.txt".to_string(),
        },
        &chunks,
    )
    .await
    .expect("should create document");
    tx.commit().await.expect("should commit");

    (temp_dir, database, kb)
}

fn store() -> IndexStore {
    IndexStore::new(Arc::new(
        DeterministicEmbedder::new(8).expect("valid dimension"),
    ))
}

#[tokio::test]
async fn aligned_index_is_consistent() {
    let (_temp_dir, database, kb) = setup(&["one", "two"]).await;
    store()
        .rebuild(Path::new(&kb.index_path), vec!["one".into(), "two".into()])
        .await
        .expect("should rebuild");

    let report = ConsistencyValidator::new(&database)
        .validate(&kb)
        .await
        .expect("should validate");

    assert_eq!(
        report,
        ConsistencyReport {
            kb_id: kb.id,
            chunk_rows: 2,
            indexed_vectors: 2,
            documents_with_bad_counts: Vec::new(),
            is_consistent: true,
        }
    );
}

#[tokio::test]
async fn missing_vectors_are_reported() {
    let (_temp_dir, database, kb) = setup(&["one", "two"]).await;

    let report = ConsistencyValidator::new(&database)
        .validate(&kb)
        .await
        .expect("should validate");

    assert_eq!(report.chunk_rows, 2);
    assert_eq!(report.indexed_vectors, 0);
    assert!(!report.is_consistent);
}

#[tokio::test]
async fn stale_chunk_counts_are_reported() {
    let (_temp_dir, database, kb) = setup(&["one", "two"]).await;
    store()
        .rebuild(Path::new(&kb.index_path), vec!["one".into()])
        .await
        .expect("should rebuild");
    sqlx::query("DELETE FROM document_chunks WHERE chunk_index = 1")
        .execute(database.pool())
        .await
        .expect("should delete chunk");

    let report = ConsistencyValidator::new(&database)
        .validate(&kb)
        .await
        .expect("should validate");

    // vectors match rows, but the document's cached count is stale
    assert_eq!(report.chunk_rows, report.indexed_vectors);
    assert_eq!(report.documents_with_bad_counts.len(), 1);
    assert!(!report.is_consistent);
}
