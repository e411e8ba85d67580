//! Embedding Provider Abstraction
//!
//! The async `EmbeddingProvider` trait, its error type and the per-backend
//! configuration. A knowledge base records the `model_id()` of the provider
//! that built it; vectors from different model ids are never compared.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while producing embeddings.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbeddingError {
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Endpoint not reachable (Ollama not running, DNS failure, ...)
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("batch size {requested} exceeds maximum {max_allowed}")]
    BatchSizeLimitExceeded { requested: usize, max_allowed: usize },

    #[error("input too long: {message}")]
    InputTooLong { message: String },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Response could not be decoded, or had the wrong count or shape
    #[error("parse error: {message}")]
    ParseError { message: String },

    #[error("server error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    ServerError { message: String, status: Option<u16> },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("embedding cancelled")]
    Cancelled,

    #[error("{message}")]
    Other { message: String },
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

impl EmbeddingError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::NetworkError { .. }
                | EmbeddingError::Timeout { .. }
                | EmbeddingError::RateLimited { .. }
                | EmbeddingError::ServerError { .. }
                | EmbeddingError::ProviderUnavailable { .. }
        )
    }

    /// Server-suggested wait before retrying a rate-limited request.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EmbeddingError::RateLimited {
                retry_after: Some(secs),
                ..
            } => Some(u64::from(*secs)),
            _ => None,
        }
    }
}

/// Embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// OpenAI `/v1/embeddings` or a compatible server
    #[serde(rename = "open_ai")]
    OpenAI,
    /// Ollama `/api/embed`
    Ollama,
    /// In-process hashed term frequencies; no network
    Local,
}

impl EmbeddingProviderType {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Ollama => "nomic-embed-text",
            Self::Local => super::local::DEFAULT_MODEL,
        }
    }

    pub fn default_dimension(&self) -> usize {
        match self {
            Self::OpenAI => 1536,
            Self::Ollama => 768,
            Self::Local => super::local::DEFAULT_DIMENSION,
        }
    }

    /// Largest number of texts one request may carry.
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::OpenAI => 2048,
            Self::Ollama => 64,
            Self::Local => 1024,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI)
    }

    /// Dimensions the backend can be asked for. `None` when the model fixes it.
    pub fn supported_dimensions(&self) -> Option<&'static [usize]> {
        match self {
            Self::OpenAI => Some(&[256, 512, 1024, 1536, 3072]),
            Self::Ollama | Self::Local => None,
        }
    }
}

impl fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
            Self::Local => "local",
        })
    }
}

/// Which backend to build and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    pub provider: EmbeddingProviderType,

    /// e.g. "text-embedding-3-small", "nomic-embed-text"
    pub model: String,

    /// Never written back to disk.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// `None` uses the backend default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    /// Texts per provider request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self::new(EmbeddingProviderType::OpenAI)
    }
}

impl EmbeddingProviderConfig {
    pub fn new(provider: EmbeddingProviderType) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: None,
            dimension: None,
            batch_size: default_batch_size().min(provider.max_batch_size()),
        }
    }

    /// First problem found, if any.
    pub fn validate(&self) -> EmbeddingResult<()> {
        let provider = self.provider;
        if provider.requires_api_key() && self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(EmbeddingError::invalid_config(format!(
                "{} embeddings require an API key",
                provider
            )));
        }
        if self.model.trim().is_empty() {
            return Err(EmbeddingError::invalid_config("model name must not be empty"));
        }
        if self.batch_size == 0 || self.batch_size > provider.max_batch_size() {
            return Err(EmbeddingError::invalid_config(format!(
                "batch_size must be between 1 and {} for {}",
                provider.max_batch_size(),
                provider
            )));
        }

        match (self.dimension, provider.supported_dimensions()) {
            (Some(0), _) => Err(EmbeddingError::invalid_config("dimension must be at least 1")),
            (Some(dim), Some(supported)) if !supported.contains(&dim) => {
                Err(EmbeddingError::invalid_config(format!(
                    "dimension {} is not available for {}; choose one of {:?}",
                    dim, provider, supported
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn effective_dimension(&self) -> usize {
        self.dimension
            .unwrap_or_else(|| self.provider.default_dimension())
    }

    pub fn effective_model(&self) -> &str {
        match self.model.trim() {
            "" => self.provider.default_model(),
            model => model,
        }
    }
}

/// A backend that turns texts into vectors of `dimension()` floats.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_documents(&[query])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::ParseError {
                message: "no vector returned for query".to_string(),
            })
    }

    fn dimension(&self) -> usize;

    async fn health_check(&self) -> EmbeddingResult<()>;

    fn max_batch_size(&self) -> usize;

    fn provider_type(&self) -> EmbeddingProviderType;

    fn model(&self) -> &str;

    /// `<provider>/<model>@<dimension>`; equal ids mean comparable vectors.
    fn model_id(&self) -> String {
        format!(
            "{}/{}@{}",
            self.provider_type(),
            self.model(),
            self.dimension()
        )
    }
}
