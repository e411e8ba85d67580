//! OpenAI Embeddings
//!
//! `POST {base_url}` with `{ model, input, dimensions? }` and a bearer key;
//! the response carries `data[].{embedding, index}`. Any OpenAI-compatible
//! `/v1/embeddings` server (Azure, vLLM, LiteLLM) works through `base_url`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    EmbeddingResult,
};
use deusto_knowledge_llm::build_http_client;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// Transport ceiling; `EmbeddingManager` applies the per-request timeout.
const HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    /// Only the text-embedding-3 family accepts it.
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    dimension: usize,
}

impl OpenAIEmbeddingProvider {
    pub fn new(config: &EmbeddingProviderConfig) -> EmbeddingResult<Self> {
        let client = build_http_client(HTTP_TIMEOUT_SECS)
            .map_err(|e| EmbeddingError::invalid_config(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.effective_model().to_string(),
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            dimension: config.effective_dimension(),
        })
    }

    fn request<'a>(&'a self, input: &'a [&'a str]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self
                .model
                .starts_with("text-embedding-3")
                .then_some(self.dimension),
        }
    }

    async fn post(&self, input: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::AuthenticationFailed {
                message: "no OpenAI API key configured (set OPENAI_API_KEY)".to_string(),
            })?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.request(input))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status.as_u16(), &body, retry_after));
        }

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::ParseError {
                    message: format!("invalid embeddings response: {}", e),
                })?;
        debug!(model = %self.model, count = parsed.data.len(), "openai embeddings received");
        order_by_index(parsed.data, input.len())
    }

    fn transport_error(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_timeout() {
            EmbeddingError::Timeout {
                seconds: HTTP_TIMEOUT_SECS,
            }
        } else if err.is_connect() {
            EmbeddingError::ProviderUnavailable {
                message: format!("{}: {}", self.endpoint, err),
            }
        } else {
            EmbeddingError::NetworkError {
                message: err.to_string(),
            }
        }
    }

    fn status_error(&self, status: u16, body: &str, retry_after: Option<u32>) -> EmbeddingError {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        match status {
            401 | 403 => EmbeddingError::AuthenticationFailed { message },
            404 => EmbeddingError::ModelNotFound {
                model: self.model.clone(),
            },
            429 => EmbeddingError::RateLimited {
                message,
                retry_after,
            },
            400 if message.contains("token") || message.contains("length") => {
                EmbeddingError::InputTooLong { message }
            }
            400 => EmbeddingError::invalid_config(message),
            _ => EmbeddingError::ServerError {
                message,
                status: Some(status),
            },
        }
    }
}

/// Place each item at its `index`; every slot must be filled exactly once.
fn order_by_index(items: Vec<EmbeddingItem>, expected: usize) -> EmbeddingResult<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(EmbeddingError::ParseError {
            message: format!("expected {} embeddings, got {}", expected, items.len()),
        });
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in items {
        match slots.get_mut(item.index) {
            Some(slot @ None) => *slot = Some(item.embedding),
            _ => {
                return Err(EmbeddingError::ParseError {
                    message: format!("unexpected or repeated embedding index {}", item.index),
                })
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
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
        self.post(documents).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> EmbeddingResult<()> {
        self.post(&["ping"]).await.map(|_| ())
    }

    fn max_batch_size(&self) -> usize {
        EmbeddingProviderType::OpenAI.max_batch_size()
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }
}
