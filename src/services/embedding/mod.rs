//! Embedding Services
//!
//! Provider abstraction, concrete backends (OpenAI, Ollama, local hashing)
//! and the `EmbeddingManager` dispatch layer used by knowledge-base builds
//! and searches.

pub mod local;
pub mod manager;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use local::LocalEmbeddingProvider;
pub use manager::{EmbeddingManager, EmbeddingManagerConfig};
pub use ollama::OllamaEmbeddingProvider;
pub use openai::OpenAIEmbeddingProvider;
pub use provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig,
    EmbeddingProviderType, EmbeddingResult,
};
