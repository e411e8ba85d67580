//! Shared fixtures: a local-embedding configuration rooted in a temp dir, an
//! embedding provider that fails on marked text, and a recording chat model.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use deusto_knowledge::services::embedding::{
    EmbeddingError, EmbeddingManager, EmbeddingProvider, EmbeddingProviderConfig,
    EmbeddingProviderType, EmbeddingResult, LocalEmbeddingProvider,
};
use deusto_knowledge::services::knowledge::BuildStatus;
use deusto_knowledge::services::rag::{AgentProfileSource, JsonFileProfiles};
use deusto_knowledge::{AgentId, AppConfig, BuildReport, KnowledgeRuntime};
use deusto_knowledge_llm::{
    LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, StopReason,
    UsageStats,
};

/// Texts containing this marker make `PoisonedProvider` fail.
pub const POISON: &str = "POISON";

pub const DIMENSION: usize = 256;

pub fn agent(id: &str) -> AgentId {
    AgentId::new(id).unwrap()
}

pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.upload_dir = root.join("uploads");
    config.storage.index_dir = root.join("indexes");
    config.storage.profiles_dir = root.join("agents");
    config.chunking.chunk_size = 200;
    config.chunking.overlap = 40;
    config.embedding.provider = EmbeddingProviderConfig::new(EmbeddingProviderType::Local);
    config.embedding.provider.dimension = Some(DIMENSION);
    config.embedding.provider.batch_size = 2;
    config.embedding.max_retry_attempts = 1;
    config
}

/// Local hashed embeddings that refuse any batch holding `POISON`.
pub struct PoisonedProvider {
    inner: LocalEmbeddingProvider,
}

impl PoisonedProvider {
    pub fn new() -> Self {
        Self {
            inner: LocalEmbeddingProvider::with_dimension(DIMENSION),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for PoisonedProvider {
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if documents.iter().any(|d| d.contains(POISON)) {
            return Err(EmbeddingError::ServerError {
                message: "upstream failure".to_string(),
                status: Some(503),
            });
        }
        self.inner.embed_documents(documents).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn health_check(&self) -> EmbeddingResult<()> {
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        self.inner.provider_type()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Chat model that answers with a fixed text and records every request.
pub struct RecordingLlm {
    config: ProviderConfig,
    requests: Mutex<Vec<(Vec<Message>, Option<String>)>>,
}

impl RecordingLlm {
    pub fn new() -> Self {
        Self {
            config: ProviderConfig::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> (Vec<Message>, Option<String>) {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LlmProvider for RecordingLlm {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn model(&self) -> &str {
        "recording-model"
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.requests.lock().unwrap().push((messages, system));
        Ok(LlmResponse {
            content: Some("recorded answer".to_string()),
            stop_reason: StopReason::EndTurn,
            usage: UsageStats::default(),
            model: "recording-model".to_string(),
        })
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Runtime over `PoisonedProvider` and `RecordingLlm`, profiles read from
/// `config.storage.profiles_dir`.
pub fn runtime(config: AppConfig) -> (KnowledgeRuntime, Arc<RecordingLlm>) {
    let embeddings = Arc::new(EmbeddingManager::new(
        Arc::new(PoisonedProvider::new()),
        config.embedding.clone(),
    ));
    let profiles: Arc<dyn AgentProfileSource> =
        Arc::new(JsonFileProfiles::new(&config.storage.profiles_dir));
    let llm = Arc::new(RecordingLlm::new());
    let runtime =
        KnowledgeRuntime::with_components(config, embeddings, profiles, llm.clone()).unwrap();
    (runtime, llm)
}

pub async fn upload(runtime: &KnowledgeRuntime, agent: &AgentId, name: &str, text: &str) {
    runtime
        .uploads()
        .store(agent, name, text.as_bytes())
        .await
        .unwrap();
}

/// Rebuild from uploads and wait for the terminal status.
pub async fn rebuild(runtime: &KnowledgeRuntime, agent: &AgentId) -> BuildStatus {
    let mut job = runtime.rebuild(agent).await.unwrap();
    job.wait().await
}

pub fn expect_success(status: BuildStatus) -> BuildReport {
    match status {
        BuildStatus::Succeeded { report } => report,
        other => panic!("expected a successful build, got {:?}", other),
    }
}
