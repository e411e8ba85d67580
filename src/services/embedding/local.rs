//! Local Hashed Term-Frequency Embeddings
//!
//! Offline embedding backend with no model download and no vocabulary state:
//! tokens are hashed into a fixed number of buckets, weighted by log term
//! frequency and L2-normalised. Vectors only capture lexical overlap, which
//! is enough for small course-material knowledge bases and for running the
//! pipeline without network access.
//!
//! Because nothing is learned from the corpus, the same text always maps to
//! the same vector, across processes and rebuilds.

use async_trait::async_trait;

use super::provider::{
    EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType, EmbeddingResult,
};

pub(crate) const DEFAULT_MODEL: &str = "hashed-tf";

pub(crate) const DEFAULT_DIMENSION: usize = 512;

/// Local hashing embedder.
pub struct LocalEmbeddingProvider {
    model: String,
    dimension: usize,
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingProviderConfig) -> Self {
        Self {
            model: config.effective_model().to_string(),
            dimension: config.effective_dimension().max(1),
        }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            dimension: dimension.max(1),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut counts = vec![0u32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            counts[bucket] += 1;
        }

        let mut vector: Vec<f32> = counts
            .into_iter()
            .map(|c| if c == 0 { 0.0 } else { 1.0 + (c as f32).ln() })
            .collect();

        let mag: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if mag > 0.0 {
            for v in &mut vector {
                *v /= mag;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(documents.iter().map(|d| self.embed_text(d)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> EmbeddingResult<()> {
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        EmbeddingProviderType::Local.max_batch_size()
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::Local
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Lowercase, split on anything that is not alphanumeric, drop 1-char tokens.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
}

/// 64-bit FNV-1a; stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
