use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::Result;
use crate::config::{Config, get_config_dir};
use crate::indexer::{ConflictPolicy, Indexer};

/// Load configuration from `base_dir`, or from the default base directory.
#[inline]
pub fn load_config(base_dir: Option<PathBuf>) -> Result<Config> {
    let base_dir = match base_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    Ok(Config::load(&base_dir)?)
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;

    println!("Base directory: {}", config.base_dir.display());
    println!("Database: {}", config.database_path().display());
    println!("Index root: {}", config.index_root().display());
    println!("Upload root: {}", config.upload_root().display());
    println!();
    print!("{rendered}");
    Ok(())
}

#[inline]
pub async fn create_kb(
    indexer: &Indexer,
    owner_id: i64,
    name: &str,
    description: Option<&str>,
) -> Result<()> {
    let kb = indexer
        .create_knowledge_base(owner_id, name, description.unwrap_or_default())
        .await?;

    println!("Created knowledge base: {} (ID: {})", kb.name, kb.id);
    println!("Index file: {}", kb.index_path);
    Ok(())
}

#[inline]
pub async fn list_kbs(indexer: &Indexer, owner_id: i64) -> Result<()> {
    let kbs = indexer.list_knowledge_bases(owner_id).await?;

    if kbs.is_empty() {
        println!("No knowledge bases for owner {owner_id} yet.");
        println!("Use 'kb-sync create-kb --owner {owner_id} <name>' to create one.");
        return Ok(());
    }

    println!("Knowledge bases ({} total):", kbs.len());
    println!();
    for kb in &kbs {
        println!("{} (ID: {})", kb.name, kb.id);
        if !kb.description.is_empty() {
            println!("   {}", kb.description);
        }
        println!("   Created: {}", kb.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!();
    }
    Ok(())
}

#[inline]
pub async fn delete_kb(indexer: &Indexer, owner_id: i64, kb_id: i64) -> Result<()> {
    let kb = indexer.get_knowledge_base(owner_id, kb_id).await?;
    indexer.delete_knowledge_base(owner_id, kb_id).await?;

    println!("Deleted knowledge base: {} (ID: {})", kb.name, kb.id);
    Ok(())
}

/// Upload a local file. The stored name is `name` when given, otherwise the
/// file's own name.
#[inline]
pub async fn upload(
    indexer: &Indexer,
    owner_id: i64,
    kb_id: i64,
    path: &Path,
    name: Option<&str>,
    policy: ConflictPolicy,
) -> Result<()> {
    let filename = match name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?,
    };

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    info!("Uploading {} to knowledge base {}", path.display(), kb_id);
    let outcome = indexer
        .upload_document(owner_id, kb_id, &filename, &mut file, policy)
        .await?;

    println!(
        "Uploaded '{}' as document {} in knowledge base {}",
        outcome.filename, outcome.document_id, outcome.kb_id
    );
    println!("  Chunks: {}", outcome.chunk_count);
    println!("  Vectors indexed: {}", outcome.vectors_indexed);
    Ok(())
}

#[inline]
pub async fn list_docs(indexer: &Indexer, owner_id: i64, kb_id: i64) -> Result<()> {
    let documents = indexer.list_documents(owner_id, kb_id).await?;

    if documents.is_empty() {
        println!("Knowledge base {kb_id} has no documents.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    for document in &documents {
        println!(
            "  [{}] {} - {} chunks, uploaded {}",
            document.id,
            document.filename,
            document.chunk_count,
            document.uploaded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

#[inline]
pub async fn delete_doc(indexer: &Indexer, owner_id: i64, document_id: i64) -> Result<()> {
    indexer.delete_document(owner_id, document_id).await?;
    println!("Deleted document {document_id}");
    Ok(())
}

#[inline]
pub async fn rebuild(indexer: &Indexer, owner_id: i64, kb_id: i64) -> Result<()> {
    let written = indexer.rebuild_knowledge_base(owner_id, kb_id).await?;
    println!("Rebuilt knowledge base {kb_id}: {written} vectors");
    Ok(())
}

#[inline]
pub async fn check(indexer: &Indexer, owner_id: i64, kb_id: i64) -> Result<()> {
    let report = indexer.check_consistency(owner_id, kb_id).await?;

    if report.is_consistent {
        println!("Knowledge base {kb_id} is consistent");
    } else {
        println!("Knowledge base {kb_id} has consistency issues:");
    }
    println!("  Chunk rows: {}", report.chunk_rows);
    println!("  Indexed vectors: {}", report.indexed_vectors);
    for mismatch in &report.documents_with_bad_counts {
        println!("  {mismatch}");
    }
    if !report.is_consistent {
        println!("Run 'kb-sync rebuild --owner {owner_id} {kb_id}' to repair the index.");
    }
    Ok(())
}

#[inline]
pub async fn search(
    indexer: &Indexer,
    owner_id: i64,
    kb_id: i64,
    query: &str,
    k: usize,
) -> Result<()> {
    let matches = indexer.search(owner_id, kb_id, query, k).await?;

    if matches.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for (rank, found) in matches.iter().enumerate() {
        println!(
            "{}. {} #{} (distance {:.4})",
            rank + 1,
            found.filename,
            found.chunk_index,
            found.distance
        );
        println!("   {}", preview(&found.text, 160));
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
