//! Settings Models
//!
//! Application configuration stored in config.json, plus partial updates and
//! environment overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::services::embedding::{EmbeddingManagerConfig, EmbeddingProviderType};
use crate::utils::paths::{default_index_dir, default_profiles_dir, default_upload_dir};
use deusto_knowledge_llm::ProviderConfig;

/// Environment variable holding the OpenAI API key (chat and embeddings).
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable overriding the upload directory.
pub const ENV_UPLOAD_DIR: &str = "DEUSTO_UPLOAD_DIR";
/// Environment variable overriding the index directory.
pub const ENV_INDEX_DIR: &str = "DEUSTO_INDEX_DIR";

const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Where uploads and knowledge-base indexes live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub index_dir: PathBuf,
    /// `<agent>.json` agent profiles
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            index_dir: default_index_dir(),
            profiles_dir: default_profiles_dir(),
        }
    }
}

/// Sliding-window parameters, in characters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// Build-time behaviour of the knowledge base manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingSettings {
    /// Skip documents that fail to load instead of aborting the build.
    #[serde(default)]
    pub tolerate_document_failures: bool,
    /// Documents larger than this are rejected by the loader.
    #[serde(default = "default_max_file_bytes")]
    pub max_document_bytes: u64,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            tolerate_document_failures: false,
            max_document_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

/// Retrieval and prompt-assembly policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalSettings {
    /// Passages requested per question.
    pub top_k: usize,
    /// Upper bound on injected context; lowest-scoring passages go first.
    pub max_context_chars: usize,
    /// Length of the citation preview shown to users.
    pub citation_preview_chars: usize,
    /// Number of past user/assistant exchanges sent to the model.
    pub history_window: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_context_chars: 6000,
            citation_preview_chars: 200,
            history_window: 4,
        }
    }
}

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadSettings {
    #[serde(default = "default_max_file_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

/// Application configuration stored in config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub indexing: IndexingSettings,
    #[serde(default)]
    pub embedding: EmbeddingManagerConfig,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub chat: ProviderConfig,
    #[serde(default)]
    pub upload: UploadSettings,
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub upload_dir: Option<PathBuf>,
    pub index_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub top_k: Option<usize>,
    pub max_context_chars: Option<usize>,
    pub embedding_provider: Option<EmbeddingProviderType>,
    pub embedding_model: Option<String>,
    pub chat_model: Option<String>,
    pub tolerate_document_failures: Option<bool>,
}

impl AppConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(dir) = update.upload_dir {
            self.storage.upload_dir = dir;
        }
        if let Some(dir) = update.index_dir {
            self.storage.index_dir = dir;
        }
        if let Some(size) = update.chunk_size {
            self.chunking.chunk_size = size;
        }
        if let Some(overlap) = update.overlap {
            self.chunking.overlap = overlap;
        }
        if let Some(k) = update.top_k {
            self.retrieval.top_k = k;
        }
        if let Some(max) = update.max_context_chars {
            self.retrieval.max_context_chars = max;
        }
        if let Some(provider) = update.embedding_provider {
            let api_key = self.embedding.provider.api_key.take();
            self.embedding.provider =
                crate::services::embedding::EmbeddingProviderConfig::new(provider);
            self.embedding.provider.api_key = api_key;
        }
        if let Some(model) = update.embedding_model {
            self.embedding.provider.model = model;
        }
        if let Some(model) = update.chat_model {
            self.chat.model = model;
        }
        if let Some(tolerate) = update.tolerate_document_failures {
            self.indexing.tolerate_document_failures = tolerate;
        }
    }

    /// Overlay values from the environment. `lookup` is `std::env::var`
    /// in production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_OPENAI_API_KEY).filter(|k| !k.trim().is_empty()) {
            if self.embedding.provider.provider == EmbeddingProviderType::OpenAI {
                self.embedding.provider.api_key = Some(key.clone());
            }
            self.chat.api_key = Some(key);
        }
        if let Some(dir) = lookup(ENV_UPLOAD_DIR).filter(|d| !d.trim().is_empty()) {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_INDEX_DIR).filter(|d| !d.trim().is_empty()) {
            self.storage.index_dir = PathBuf::from(dir);
        }
    }

    /// Validate the configuration. Secrets are not required here; they are
    /// checked when providers are built.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunking.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        if self.retrieval.max_context_chars == 0 {
            return Err("max_context_chars must be greater than zero".to_string());
        }
        if self.embedding.provider.model.trim().is_empty() {
            return Err("embedding model must not be empty".to_string());
        }
        if self.embedding.provider.batch_size == 0 {
            return Err("embedding batch_size must be at least 1".to_string());
        }
        if self.embedding.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be at least 1".to_string());
        }
        if self.embedding.request_timeout_secs == 0 || self.chat.timeout_secs == 0 {
            return Err("timeouts must be at least 1 second".to_string());
        }
        if self.upload.max_upload_bytes == 0 || self.indexing.max_document_bytes == 0 {
            return Err("size limits must be greater than zero".to_string());
        }
        Ok(())
    }
}
