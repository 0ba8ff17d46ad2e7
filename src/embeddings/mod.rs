// Embeddings module
// Chunking of document text and the embedding strategies behind one trait

pub mod chunking;
pub mod embedder;
pub mod openai;

pub use chunking::{ChunkingConfig, chunk_text};
pub use embedder::{DeterministicEmbedder, Embedder, create_embedder};
pub use openai::OpenAiEmbedder;
