//! Embedding model connectors.

pub mod mock;
pub mod openai;

pub use mock::MockEmbedder;
pub use openai::{OpenAiEmbedder, OpenAiEmbeddingConfig, DEFAULT_EMBEDDING_DIMENSION};
