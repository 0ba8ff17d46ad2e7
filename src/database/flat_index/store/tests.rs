use super::*;
use crate::embeddings::DeterministicEmbedder;
use tempfile::TempDir;

fn store() -> IndexStore {
    IndexStore::new(Arc::new(
        DeterministicEmbedder::new(8).expect("valid dimension"),
    ))
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn load_treats_missing_empty_and_corrupt_files_as_absent() {
    let temp_dir = TempDir::new().expect("should create TempDir");

    let missing = temp_dir.path().join("missing.index");
    assert!(IndexStore::load(&missing).is_none());
    assert_eq!(IndexStore::count(&missing), 0);

    let empty = temp_dir.path().join("empty.index");
    fs::write(&empty, b"").expect("should write file");
    assert!(IndexStore::load(&empty).is_none());

    let corrupt = temp_dir.path().join("corrupt.index");
    fs::write(&corrupt, b"garbage that is not an index").expect("should write file");
    assert!(IndexStore::load(&corrupt).is_none());
    assert_eq!(IndexStore::count(&corrupt), 0);
}

#[test]
fn save_then_load_round_trips() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let path = temp_dir.path().join("user_1").join("kb_1.index");

    let index = IndexStore::add(None, &[vec![0.5; 4], vec![0.25; 4]]).expect("adds");
    IndexStore::save(&index, &path).expect("saves");

    let loaded = IndexStore::load(&path).expect("loads");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.dimension(), 4);
    assert_eq!(IndexStore::count(&path), 2);

    // overwrite in place
    IndexStore::save(&FlatIndex::new(4), &path).expect("saves");
    assert_eq!(IndexStore::count(&path), 0);
}

#[test]
fn add_replaces_index_of_other_dimension() {
    let existing = IndexStore::add(None, &[vec![1.0; 3]]).expect("adds");
    let grown = IndexStore::add(Some(existing.clone()), &[vec![2.0; 3]]).expect("adds");
    assert_eq!(grown.len(), 2);

    let replaced = IndexStore::add(Some(existing), &[vec![2.0; 5]]).expect("adds");
    assert_eq!(replaced.len(), 1);
    assert_eq!(replaced.dimension(), 5);
}

#[test]
fn create_empty_does_not_clobber() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let path = temp_dir.path().join("user_1").join("kb_2.index");

    IndexStore::create_empty(&path).expect("creates");
    assert!(path.exists());
    assert_eq!(fs::metadata(&path).expect("metadata").len(), 0);

    let index = IndexStore::add(None, &[vec![1.0; 2]]).expect("adds");
    IndexStore::save(&index, &path).expect("saves");
    IndexStore::create_empty(&path).expect("second create is a no-op");
    assert_eq!(IndexStore::count(&path), 1);
}

#[tokio::test]
async fn rebuild_counts_non_blank_texts() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let path = temp_dir.path().join("kb.index");
    let store = store();

    let written = store
        .rebuild(&path, texts(&["alpha", "  ", "beta", "", "gamma"]))
        .await
        .expect("rebuilds");
    assert_eq!(written, 3);
    assert_eq!(IndexStore::count(&path), 3);

    let written = store.rebuild(&path, Vec::new()).await.expect("rebuilds");
    assert_eq!(written, 0);
    assert!(path.exists());
    assert_eq!(fs::metadata(&path).expect("metadata").len(), 0);
    assert_eq!(IndexStore::count(&path), 0);
}

#[tokio::test]
async fn append_reports_vectors_added() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let path = temp_dir.path().join("kb.index");
    let store = store();

    IndexStore::create_empty(&path).expect("creates");
    assert_eq!(
        store.append(&path, texts(&["a", "b"])).await.expect("appends"),
        IndexAppend {
            added: 2,
            replaced: false
        }
    );
    assert_eq!(
        store.append(&path, texts(&["c"])).await.expect("appends").added,
        1
    );
    assert_eq!(
        store.append(&path, Vec::new()).await.expect("appends"),
        IndexAppend::default()
    );
    assert_eq!(IndexStore::count(&path), 3);
}

#[tokio::test]
async fn append_flags_dimension_change() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let path = temp_dir.path().join("kb.index");

    store()
        .append(&path, texts(&["a", "b"]))
        .await
        .expect("appends");

    let wider = IndexStore::new(Arc::new(
        DeterministicEmbedder::new(16).expect("valid dimension"),
    ));
    let appended = wider.append(&path, texts(&["c"])).await.expect("appends");

    assert_eq!(
        appended,
        IndexAppend {
            added: 1,
            replaced: true
        }
    );
    let index = IndexStore::load(&path).expect("index exists");
    assert_eq!(index.dimension(), 16);
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn rebuild_matches_sequential_appends() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let rebuilt = temp_dir.path().join("rebuilt.index");
    let appended = temp_dir.path().join("appended.index");
    let store = store();

    store
        .rebuild(&rebuilt, texts(&["one", "two", "three"]))
        .await
        .expect("rebuilds");
    store
        .append(&appended, texts(&["one", "two"]))
        .await
        .expect("appends");
    store
        .append(&appended, texts(&["three"]))
        .await
        .expect("appends");

    assert_eq!(IndexStore::load(&rebuilt), IndexStore::load(&appended));
}

#[tokio::test]
async fn search_finds_exact_text_first() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let path = temp_dir.path().join("kb.index");
    let store = store();

    store
        .rebuild(&path, texts(&["red", "green", "blue"]))
        .await
        .expect("rebuilds");

    let result = store
        .search(&path, "green".to_string(), 2)
        .await
        .expect("searches");
    assert_eq!(result.indexed, 3);
    let hits = result.hits;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].position, 1);
    assert!(hits[0].distance.abs() < f32::EPSILON);

    let none = store
        .search(&temp_dir.path().join("absent.index"), "green".to_string(), 2)
        .await
        .expect("searches");
    assert_eq!(none, IndexSearch::default());
    assert_eq!(
        IndexStore::vector_count(&path).await.expect("counts"),
        3
    );
}
