//! Runtime State
//!
//! `KnowledgeRuntime` owns every service of the knowledge core and is passed
//! explicitly to callers. There is no process-wide state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::models::settings::AppConfig;
use crate::services::embedding::EmbeddingManager;
use crate::services::knowledge::{BuildJob, BuildScheduler, KnowledgeBaseManager, UploadService};
use crate::services::rag::{
    AgentProfileSource, JsonFileProfiles, PassageRetriever, ResponseAssembler,
};
use crate::utils::error::{AppError, AppResult};
use deusto_knowledge_core::AgentId;
use deusto_knowledge_llm::{LlmProvider, OpenAIProvider};

/// All services, wired from one configuration.
pub struct KnowledgeRuntime {
    config: AppConfig,
    embeddings: Arc<EmbeddingManager>,
    knowledge: Arc<KnowledgeBaseManager>,
    scheduler: BuildScheduler,
    uploads: UploadService,
    assembler: ResponseAssembler,
}

impl KnowledgeRuntime {
    /// Build the configured providers and wire every service.
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::validation)?;
        let embeddings = Arc::new(EmbeddingManager::from_config(config.embedding.clone())?);
        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAIProvider::new(config.chat.clone())?);
        let profiles: Arc<dyn AgentProfileSource> =
            Arc::new(JsonFileProfiles::new(&config.storage.profiles_dir));
        Self::with_components(config, embeddings, profiles, llm)
    }

    /// Wire services around caller-supplied providers.
    pub fn with_components(
        config: AppConfig,
        embeddings: Arc<EmbeddingManager>,
        profiles: Arc<dyn AgentProfileSource>,
        llm: Arc<dyn LlmProvider>,
    ) -> AppResult<Self> {
        let knowledge = Arc::new(KnowledgeBaseManager::from_config(
            &config,
            Arc::clone(&embeddings),
        )?);
        let scheduler = BuildScheduler::new(Arc::clone(&knowledge));
        let uploads = UploadService::new(
            config.storage.upload_dir.clone(),
            config.upload.max_upload_bytes,
        );
        let retriever: Arc<dyn PassageRetriever> = knowledge.clone();
        let assembler = ResponseAssembler::new(
            retriever,
            profiles,
            llm,
            config.retrieval.clone(),
            Duration::from_secs(config.chat.timeout_secs),
        );

        info!(
            embedding_model = %embeddings.model_id(),
            index_dir = %config.storage.index_dir.display(),
            "knowledge runtime ready"
        );

        Ok(Self {
            config,
            embeddings,
            knowledge,
            scheduler,
            uploads,
            assembler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingManager> {
        &self.embeddings
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBaseManager> {
        &self.knowledge
    }

    pub fn scheduler(&self) -> &BuildScheduler {
        &self.scheduler
    }

    pub fn uploads(&self) -> &UploadService {
        &self.uploads
    }

    pub fn assembler(&self) -> &ResponseAssembler {
        &self.assembler
    }

    /// Queue a rebuild of `agent`'s knowledge base from all of its uploads.
    pub async fn rebuild(&self, agent: &AgentId) -> AppResult<BuildJob> {
        let documents = self.uploads.list(agent).await?;
        self.scheduler.submit(agent.clone(), documents)
    }

    /// Remove the agent's knowledge base and uploaded documents.
    pub async fn delete_agent(&self, agent: &AgentId) -> AppResult<bool> {
        let had_index = self.knowledge.delete_for_agent(agent).await?;
        let had_uploads = self.uploads.delete_agent(agent).await?;
        Ok(had_index || had_uploads)
    }
}
