use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.backend, EmbeddingBackend::Live);
    assert_eq!(config.embedding.model, "text-embedding-3-small");
    assert_eq!(config.embedding.batch_size, 64);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = "   ".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embedding.base_url = "ftp://example.com".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidUrl(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidChunkOverlap(1000, 1000))
    ));

    let mut invalid_config = config;
    invalid_config.chunking.chunk_size = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidChunkSize(0))
    ));
}

#[test]
fn deterministic_backend_ignores_live_settings() {
    let mut config = Config::default();
    config.embedding.backend = EmbeddingBackend::Deterministic;
    config.embedding.model = String::new();
    assert!(config.validate().is_ok());

    config.embedding.dimension = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(0))
    ));
}

#[test]
fn base_url_gets_trailing_slash() {
    let config = EmbeddingConfig {
        base_url: "https://dashscope.example.com/compatible-mode/v1".to_string(),
        ..EmbeddingConfig::default()
    };
    let url = config.base_url().expect("should parse base url");
    assert_eq!(
        url.join("embeddings").expect("should join").as_str(),
        "https://dashscope.example.com/compatible-mode/v1/embeddings"
    );
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_fills_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [embedding]
        backend = "deterministic"
        dimension = 16
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.embedding.backend, EmbeddingBackend::Deterministic);
    assert_eq!(parsed.embedding.dimension, 16);
    assert_eq!(parsed.chunking, ChunkingConfig::default());
    assert_eq!(parsed.storage, StorageConfig::default());
}

#[test]
fn unknown_backend_is_rejected() {
    let parsed: Result<Config, toml::de::Error> = toml::from_str(
        r#"
        [embedding]
        backend = "fake"
        "#,
    );
    assert!(parsed.is_err());
}

#[test]
fn load_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.embedding, EmbeddingConfig::default());
}

#[test]
fn storage_roots_resolve_against_base_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.index_root(), temp_dir.path().join("indexes"));
    assert_eq!(config.upload_root(), temp_dir.path().join("uploads"));
    assert_eq!(config.database_path(), temp_dir.path().join("metadata.db"));

    let absolute = temp_dir.path().join("elsewhere");
    config.storage.index_root = absolute.clone();
    assert_eq!(config.index_root(), absolute);
}
