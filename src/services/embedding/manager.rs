//! Embedding Manager Dispatch Layer
//!
//! Single dispatch point for embedding work. Splits input into provider-sized
//! batches, runs them with bounded concurrency while preserving input order,
//! retries transient failures with exponential backoff, bounds every request
//! with a timeout, and validates what the provider returns.
//!
//! Query embeddings are cached by content (`mini_moka::sync::Cache`), keyed by
//! the provider's model id and a SHA-256 of the text.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use mini_moka::sync::{Cache, ConcurrentCacheExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::local::LocalEmbeddingProvider;
use super::ollama::OllamaEmbeddingProvider;
use super::openai::OpenAIEmbeddingProvider;
use super::provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    EmbeddingResult,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the `EmbeddingManager` dispatch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingManagerConfig {
    /// Embedding provider configuration.
    #[serde(default)]
    pub provider: EmbeddingProviderConfig,

    /// Maximum number of provider requests in flight at once.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per batch before a transient error is surfaced.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: usize,

    /// First backoff delay; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retry_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

impl Default for EmbeddingManagerConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderConfig::default(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            cache_enabled: default_cache_enabled(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl EmbeddingManagerConfig {
    pub fn validate(&self) -> EmbeddingResult<()> {
        self.provider.validate()?;
        if self.max_concurrent_requests == 0 {
            return Err(EmbeddingError::InvalidConfig {
                message: "max_concurrent_requests must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(EmbeddingError::InvalidConfig {
                message: "request_timeout_secs must be at least 1".to_string(),
            });
        }
        if self.max_retry_attempts == 0 {
            return Err(EmbeddingError::InvalidConfig {
                message: "max_retry_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// Model id plus SHA-256 of the text. The model id already encodes the
/// dimension, so a dimension change never serves stale vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model_id: String,
    text_hash: [u8; 32],
}

impl CacheKey {
    fn new(model_id: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self {
            model_id: model_id.to_string(),
            text_hash: hasher.finalize().into(),
        }
    }
}

// ---------------------------------------------------------------------------
// EmbeddingManager
// ---------------------------------------------------------------------------

/// Central dispatch layer for embedding operations, shared via
/// `Arc<EmbeddingManager>`.
///
/// The concurrency limit is global to the manager, so parallel builds for
/// different agents share the same request budget.
pub struct EmbeddingManager {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: Arc<Semaphore>,
    cache: Option<Cache<CacheKey, Vec<f32>>>,
    config: EmbeddingManagerConfig,
}

impl EmbeddingManager {
    /// Construct a manager around a pre-built provider.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingManagerConfig) -> Self {
        let cache = if config.cache_enabled {
            Some(
                Cache::builder()
                    .max_capacity(config.cache_max_entries as u64)
                    .time_to_live(Duration::from_secs(config.cache_ttl_secs))
                    .build(),
            )
        } else {
            None
        };

        Self {
            provider,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            cache,
            config,
        }
    }

    /// Validate the configuration and build the configured provider.
    pub fn from_config(config: EmbeddingManagerConfig) -> EmbeddingResult<Self> {
        config.validate()?;
        let provider = Self::build_provider(&config.provider)?;
        Ok(Self::new(provider, config))
    }

    fn build_provider(
        config: &EmbeddingProviderConfig,
    ) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
        match config.provider {
            EmbeddingProviderType::OpenAI => Ok(Arc::new(OpenAIEmbeddingProvider::new(config)?)),
            EmbeddingProviderType::Ollama => Ok(Arc::new(OllamaEmbeddingProvider::new(config))),
            EmbeddingProviderType::Local => Ok(Arc::new(LocalEmbeddingProvider::new(config))),
        }
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Embed passage texts, returning one vector per input in input order.
    ///
    /// Fails as a whole if any batch fails after retries; nothing partial is
    /// returned. Cancelling `cancel` aborts in-flight requests.
    pub async fn embed_documents(
        &self,
        texts: &[&str],
        cancel: &CancellationToken,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.batch_size();
        let batches: Vec<&[&str]> = texts.chunks(batch_size).collect();
        debug!(
            model = %self.model_id(),
            texts = texts.len(),
            batches = batches.len(),
            batch_size,
            "embedding documents"
        );

        // Built up front: a mapping closure inside the stream is not general
        // over the lifetime of `texts` once the caller is `tokio::spawn`ed.
        let requests: Vec<BoxFuture<'_, EmbeddingResult<Vec<Vec<f32>>>>> = batches
            .into_iter()
            .map(|batch| self.embed_batch(batch, cancel).boxed())
            .collect();
        let per_batch: Vec<Vec<Vec<f32>>> = stream::iter(requests)
            .buffered(self.config.max_concurrent_requests.max(1))
            .try_collect()
            .await?;

        Ok(per_batch.into_iter().flatten().collect())
    }

    /// Embed a query text, consulting the cache first.
    pub async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        let model_id = self.model_id();
        if let Some(cached) = self.cache_get(&model_id, query) {
            return Ok(cached);
        }

        let cancel = CancellationToken::new();
        let vectors = self.embed_batch(&[query], &cancel).await?;
        let embedding = vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::ParseError {
                message: "provider returned no vector for query".to_string(),
            })?;

        self.cache_put(&model_id, query, embedding.clone());
        Ok(embedding)
    }

    pub async fn health_check(&self) -> EmbeddingResult<()> {
        self.provider.health_check().await
    }

    /// Identifier of the vector space produced by the provider.
    pub fn model_id(&self) -> String {
        self.provider.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn config(&self) -> &EmbeddingManagerConfig {
        &self.config
    }

    /// Effective batch size: configured size capped by the provider limit.
    pub fn batch_size(&self) -> usize {
        self.config
            .provider
            .batch_size
            .min(self.provider.max_batch_size())
            .max(1)
    }

    /// Returns the number of entries currently in the cache (0 if disabled).
    pub fn cache_entry_count(&self) -> u64 {
        self.cache.as_ref().map_or(0, |c| {
            c.sync();
            c.entry_count()
        })
    }

    pub fn cache_invalidate_all(&self) {
        if let Some(ref cache) = self.cache {
            cache.invalidate_all();
            cache.sync();
        }
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    async fn embed_batch(
        &self,
        batch: &[&str],
        cancel: &CancellationToken,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
            permit = self.limiter.acquire() => permit.map_err(|_| EmbeddingError::Other {
                message: "embedding limiter closed".to_string(),
            })?,
        };

        let vectors = self
            .with_retry(cancel, || self.provider.embed_documents(batch))
            .await?;
        self.validate_output(batch.len(), &vectors)?;
        Ok(vectors)
    }

    /// Run `op` with timeout and retry + exponential backoff.
    ///
    /// Respects `retry_after_secs()` from rate-limit responses; otherwise the
    /// delay doubles from `retry_base_delay_ms` up to `retry_max_delay_ms`.
    async fn with_retry<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> EmbeddingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EmbeddingResult<T>>,
    {
        let attempts = self.config.max_retry_attempts.max(1);
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let mut last_err: Option<EmbeddingError> = None;

        for attempt in 0..attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                res = tokio::time::timeout(timeout, op()) => res.unwrap_or(Err(EmbeddingError::Timeout {
                    seconds: self.config.request_timeout_secs,
                })),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt + 1 == attempts {
                last_err = Some(err);
                break;
            }

            let wait = self.backoff_delay(attempt, &err);
            warn!(
                attempt = attempt + 1,
                max_attempts = attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "embedding request failed, backing off"
            );
            last_err = Some(err);

            tokio::select! {
                _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Err(last_err.unwrap_or_else(|| EmbeddingError::Other {
            message: "retry attempts exhausted".to_string(),
        }))
    }

    fn backoff_delay(&self, attempt: usize, err: &EmbeddingError) -> Duration {
        if let Some(secs) = err.retry_after_secs() {
            return Duration::from_secs(secs);
        }
        let shift = attempt.min(16) as u32;
        let backoff = self.config.retry_base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(backoff.min(self.config.retry_max_delay_ms))
    }

    /// Reject wrong counts, inconsistent dimensions and non-finite values.
    fn validate_output(&self, expected: usize, vectors: &[Vec<f32>]) -> EmbeddingResult<()> {
        if vectors.len() != expected {
            return Err(EmbeddingError::ParseError {
                message: format!(
                    "expected {} vectors from {}, got {}",
                    expected,
                    self.model_id(),
                    vectors.len()
                ),
            });
        }

        let dimension = self.provider.dimension();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dimension {
                return Err(EmbeddingError::ParseError {
                    message: format!(
                        "vector {} has dimension {}, expected {}",
                        i,
                        v.len(),
                        dimension
                    ),
                });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(EmbeddingError::ParseError {
                    message: format!("vector {} contains non-finite values", i),
                });
            }
        }
        Ok(())
    }

    fn cache_get(&self, model_id: &str, text: &str) -> Option<Vec<f32>> {
        self.cache
            .as_ref()
            .and_then(|c| c.get(&CacheKey::new(model_id, text)))
    }

    fn cache_put(&self, model_id: &str, text: &str, embedding: Vec<f32>) {
        if let Some(ref cache) = self.cache {
            cache.insert(CacheKey::new(model_id, text), embedding);
        }
    }
}

// Compile-time assertion that EmbeddingManager is Send + Sync.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_embedding_manager() {
        assert_send_sync::<EmbeddingManager>();
    }
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
