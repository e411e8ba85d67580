//! Ollama Embeddings
//!
//! `EmbeddingProvider` over a local Ollama server through the `ollama-rs`
//! SDK. No API key; the model must already be pulled. The dimension comes
//! from configuration so `model_id()` is known before the first request.

use async_trait::async_trait;
use ollama_rs::error::OllamaError;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use tracing::debug;

use super::provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    EmbeddingResult,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_PORT: u16 = 11434;

pub struct OllamaEmbeddingProvider {
    client: Ollama,
    model: String,
    dimension: usize,
    base_url: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: &EmbeddingProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: client_for(&base_url),
            model: config.effective_model().to_string(),
            dimension: config.effective_dimension(),
            base_url,
        }
    }

    fn classify(&self, err: OllamaError) -> EmbeddingError {
        let text = err.to_string();
        let lower = text.to_lowercase();
        if lower.contains("connect") || lower.contains("refused") {
            EmbeddingError::ProviderUnavailable {
                message: format!("Ollama at {} is not reachable: {}", self.base_url, text),
            }
        } else if lower.contains("not found") || lower.contains("404") {
            EmbeddingError::ModelNotFound {
                model: self.model.clone(),
            }
        } else {
            EmbeddingError::NetworkError { message: text }
        }
    }
}

/// Client for `base_url`, keeping only scheme, host and port. Anything that
/// is not an http(s) URL with a host falls back to the local default.
fn client_for(base_url: &str) -> Ollama {
    match url::Url::parse(base_url) {
        Ok(mut url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            let port = url.port().unwrap_or(DEFAULT_PORT);
            url.set_path("");
            url.set_query(None);
            Ollama::builder().host(url).port(port).build()
        }
        _ => Ollama::default(),
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let limit = self.max_batch_size();
        if documents.len() > limit {
            return Err(EmbeddingError::BatchSizeLimitExceeded {
                requested: documents.len(),
                max_allowed: limit,
            });
        }

        let request = GenerateEmbeddingsRequest::new(
            self.model.clone(),
            EmbeddingsInput::from(documents.to_vec()),
        );
        let embeddings = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| self.classify(e))?
            .embeddings;

        debug!(model = %self.model, count = embeddings.len(), "ollama embeddings received");
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> EmbeddingResult<()> {
        let local = self
            .client
            .list_local_models()
            .await
            .map_err(|e| self.classify(e))?;

        let wanted = base_name(&self.model);
        if local.iter().any(|m| m.name == self.model || base_name(&m.name) == wanted) {
            Ok(())
        } else {
            Err(EmbeddingError::ModelNotFound {
                model: format!("{} (run `ollama pull {}`)", self.model, self.model),
            })
        }
    }

    fn max_batch_size(&self) -> usize {
        EmbeddingProviderType::Ollama.max_batch_size()
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Model name without its `:tag`.
fn base_name(model: &str) -> &str {
    model.split(':').next().unwrap_or(model)
}
