// Configuration management module
// Loads config.toml from the base directory and validates it

pub mod settings;


pub use settings::{Config, ConfigError, EmbeddingBackend, EmbeddingConfig, StorageConfig};

/// Get the default base directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_base_dir()
}
