//! Knowledge Base Manager
//!
//! Owns the write path (load -> chunk -> embed -> persist) and the read path
//! (query embedding + vector search) for every agent.
//!
//! A build never touches the agent's current index until the new one is fully
//! written. At most one build runs per agent; builds for different agents run
//! in parallel and share the embedding manager's request budget.
//!
//! Documents whose content hash, chunking parameters and embedding model match
//! the current index reuse their stored vectors instead of being re-embedded.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::document::{Document, Passage, RawSegment, ScoredPassage};
use crate::models::settings::AppConfig;
use crate::services::embedding::{EmbeddingError, EmbeddingManager};
use crate::services::knowledge::chunker::{Chunker, SlidingWindowChunker};
use crate::services::knowledge::loader::LoaderRegistry;
use crate::services::knowledge::vector_index::{
    DocumentManifest, IndexHandle, IndexManifest, VectorIndex,
};
use crate::utils::error::{AppError, AppResult, BuildStage};
use deusto_knowledge_core::AgentId;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A document left out of a build when failure tolerance is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub file_name: String,
    pub error: String,
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub agent_id: AgentId,
    pub documents_indexed: usize,
    pub passages: usize,
    /// Documents whose stored vectors were reused.
    pub reused_documents: usize,
    /// Passages sent to the embedding provider.
    pub embedded_passages: usize,
    pub skipped: Vec<SkippedDocument>,
    pub embedding_model: String,
    pub duration_ms: u64,
}

/// Summary of an agent's persisted knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    pub agent_id: AgentId,
    pub document_count: usize,
    pub passage_count: usize,
    pub embedding_model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<DocumentManifest>,
}

// ---------------------------------------------------------------------------
// Build guard
// ---------------------------------------------------------------------------

/// Marks an agent as building until dropped.
struct BuildGuard {
    building: Arc<Mutex<HashSet<AgentId>>>,
    agent: AgentId,
}

impl BuildGuard {
    fn acquire(building: &Arc<Mutex<HashSet<AgentId>>>, agent: &AgentId) -> AppResult<Self> {
        let mut set = building.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(agent.clone()) {
            return Err(AppError::BuildInProgress(agent.to_string()));
        }
        Ok(Self {
            building: Arc::clone(building),
            agent: agent.clone(),
        })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.building
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.agent);
    }
}

// ---------------------------------------------------------------------------
// Handle cache
// ---------------------------------------------------------------------------

/// Loaded indexes per agent. Every build or delete bumps the agent's
/// generation; a handle read from disk is only cached if no build or delete
/// happened while it was being read.
#[derive(Default)]
struct HandleCache {
    entries: HashMap<AgentId, Arc<IndexHandle>>,
    generations: HashMap<AgentId, u64>,
}

impl HandleCache {
    fn generation(&self, agent: &AgentId) -> u64 {
        self.generations.get(agent).copied().unwrap_or(0)
    }

    fn get(&self, agent: &AgentId) -> Option<Arc<IndexHandle>> {
        self.entries.get(agent).cloned()
    }

    /// Cache `handle` loaded at `generation` unless it went stale meanwhile.
    /// Returns the handle callers should use.
    fn offer(
        &mut self,
        agent: &AgentId,
        handle: Arc<IndexHandle>,
        generation: u64,
    ) -> Arc<IndexHandle> {
        if self.generation(agent) != generation {
            return handle;
        }
        Arc::clone(self.entries.entry(agent.clone()).or_insert(handle))
    }

    fn replace(&mut self, agent: &AgentId, handle: Arc<IndexHandle>) {
        *self.generations.entry(agent.clone()).or_insert(0) += 1;
        self.entries.insert(agent.clone(), handle);
    }

    fn invalidate(&mut self, agent: &AgentId) {
        *self.generations.entry(agent.clone()).or_insert(0) += 1;
        self.entries.remove(agent);
    }
}

// ---------------------------------------------------------------------------
// KnowledgeBaseManager
// ---------------------------------------------------------------------------

/// A loaded document on its way into the index.
struct LoadedDocument {
    document: Document,
    content_hash: String,
    segments: Vec<RawSegment>,
}

/// Passages of one document plus stored vectors when they can be reused.
struct ChunkedDocument {
    manifest: DocumentManifest,
    passages: Vec<Passage>,
    reused_vectors: Option<Vec<Vec<f32>>>,
}

pub struct KnowledgeBaseManager {
    loaders: Arc<LoaderRegistry>,
    chunker: Arc<dyn Chunker>,
    embeddings: Arc<EmbeddingManager>,
    index: VectorIndex,
    handles: RwLock<HandleCache>,
    building: Arc<Mutex<HashSet<AgentId>>>,
    tolerate_document_failures: bool,
}

impl KnowledgeBaseManager {
    pub fn new(
        loaders: Arc<LoaderRegistry>,
        chunker: Arc<dyn Chunker>,
        embeddings: Arc<EmbeddingManager>,
        index: VectorIndex,
        tolerate_document_failures: bool,
    ) -> Self {
        Self {
            loaders,
            chunker,
            embeddings,
            index,
            handles: RwLock::new(HandleCache::default()),
            building: Arc::new(Mutex::new(HashSet::new())),
            tolerate_document_failures,
        }
    }

    /// Wire the manager from application config around a shared embedding
    /// manager. Fails fast on invalid chunking parameters.
    pub fn from_config(config: &AppConfig, embeddings: Arc<EmbeddingManager>) -> AppResult<Self> {
        let chunker =
            SlidingWindowChunker::new(config.chunking.chunk_size, config.chunking.overlap)?;
        Ok(Self::new(
            Arc::new(LoaderRegistry::new(config.indexing.max_document_bytes)),
            Arc::new(chunker),
            embeddings,
            VectorIndex::new(&config.storage.index_dir),
            config.indexing.tolerate_document_failures,
        ))
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingManager> {
        &self.embeddings
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn is_building(&self, agent: &AgentId) -> bool {
        self.building
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(agent)
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Rebuild `agent`'s knowledge base from `documents`.
    pub async fn build_for_agent(
        &self,
        agent: &AgentId,
        documents: &[Document],
    ) -> AppResult<BuildReport> {
        self.build_for_agent_with_cancel(agent, documents, &CancellationToken::new())
            .await
    }

    /// Rebuild with cancellation. A cancelled build returns `Cancelled` and
    /// persists nothing.
    pub async fn build_for_agent_with_cancel(
        &self,
        agent: &AgentId,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> AppResult<BuildReport> {
        let _guard = BuildGuard::acquire(&self.building, agent)?;
        let started = Instant::now();
        let model_id = self.embeddings.model_id();
        info!(agent = %agent, documents = documents.len(), model = %model_id, "knowledge base build started");

        let previous = self.reusable_index(agent, &model_id).await;

        // Load
        let (loaded, skipped) = self.load_documents(agent, documents, cancel).await?;

        // Chunk
        let chunked = self.chunk_documents(loaded, previous).await?;

        // Embed
        let mut passages: Vec<Passage> = Vec::new();
        let mut pending: Vec<(usize, usize)> = Vec::new();
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::new();
        let mut document_manifests = Vec::with_capacity(chunked.len());
        let mut reused_documents = 0usize;

        for doc in chunked {
            if doc.reused_vectors.is_some() {
                reused_documents += 1;
            }
            let mut stored = doc.reused_vectors.map(Vec::into_iter);
            for mut passage in doc.passages {
                passage.ordinal = passages.len();
                match stored.as_mut().and_then(|it| it.next()) {
                    Some(v) => vectors.push(Some(v)),
                    None => {
                        pending.push((passages.len(), vectors.len()));
                        vectors.push(None);
                    }
                }
                passages.push(passage);
            }
            document_manifests.push(doc.manifest);
        }

        let texts: Vec<&str> = pending
            .iter()
            .map(|(p, _)| passages[*p].content.as_str())
            .collect();
        let embedded = self
            .embeddings
            .embed_documents(&texts, cancel)
            .await
            .map_err(|e| match e {
                EmbeddingError::Cancelled => AppError::Cancelled,
                other => AppError::index_build(BuildStage::Embed, None, other.into()),
            })?;
        if embedded.len() != pending.len() {
            return Err(AppError::index_build(
                BuildStage::Embed,
                None,
                AppError::internal(format!(
                    "expected {} vectors, got {}",
                    pending.len(),
                    embedded.len()
                )),
            ));
        }
        let embedded_passages = embedded.len();
        for ((_, slot), vector) in pending.iter().zip(embedded) {
            vectors[*slot] = Some(vector);
        }
        let vectors: Vec<Vec<f32>> = vectors.into_iter().flatten().collect();

        // Persist
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let manifest = IndexManifest::new(
            agent.clone(),
            model_id.clone(),
            self.embeddings.dimension(),
            self.chunker.params(),
            document_manifests,
        );
        let documents_indexed = manifest.documents.len();
        let passage_count = passages.len();
        let handle = self
            .index
            .build(manifest, passages, vectors)
            .await
            .map_err(|e| AppError::index_build(BuildStage::Persist, None, e))?;

        self.handles.write().await.replace(agent, handle);

        let report = BuildReport {
            agent_id: agent.clone(),
            documents_indexed,
            passages: passage_count,
            reused_documents,
            embedded_passages,
            skipped,
            embedding_model: model_id,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            agent = %agent,
            documents = report.documents_indexed,
            passages = report.passages,
            reused = report.reused_documents,
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "knowledge base build finished"
        );
        Ok(report)
    }

    /// Current index if its vectors can be reused by a build with `model_id`
    /// and the configured chunking.
    async fn reusable_index(&self, agent: &AgentId, model_id: &str) -> Option<Arc<IndexHandle>> {
        let handle = match self.index.load(agent).await {
            Ok(handle) => handle?,
            Err(e) => {
                warn!(agent = %agent, error = %e, "ignoring unreadable index during rebuild");
                return None;
            }
        };
        let manifest = handle.manifest();
        if manifest.embedding_model != model_id || manifest.chunking != self.chunker.params() {
            debug!(agent = %agent, "previous index not reusable");
            return None;
        }
        Some(handle)
    }

    async fn load_documents(
        &self,
        agent: &AgentId,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> AppResult<(Vec<LoadedDocument>, Vec<SkippedDocument>)> {
        let mut loaded = Vec::with_capacity(documents.len());
        let mut skipped = Vec::new();
        let mut first_failure: Option<AppError> = None;
        let mut seen = HashSet::new();

        for document in documents {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let fail = |source: AppError| {
                AppError::index_build(BuildStage::Load, Some(document.file_name.clone()), source)
            };

            if &document.agent_id != agent {
                return Err(fail(AppError::validation(format!(
                    "document belongs to agent {}",
                    document.agent_id
                ))));
            }
            if !seen.insert(document.id.clone()) {
                return Err(fail(AppError::validation("duplicate document id")));
            }

            match self.load_one(document).await {
                Ok(doc) => loaded.push(doc),
                Err(e) if self.tolerate_document_failures => {
                    warn!(agent = %agent, document = %document.file_name, error = %e, "skipping document");
                    skipped.push(SkippedDocument {
                        file_name: document.file_name.clone(),
                        error: e.to_string(),
                    });
                    first_failure.get_or_insert(fail(e));
                }
                Err(e) => return Err(fail(e)),
            }
        }

        if loaded.is_empty() {
            if let Some(err) = first_failure {
                return Err(err);
            }
        }
        Ok((loaded, skipped))
    }

    async fn load_one(&self, document: &Document) -> AppResult<LoadedDocument> {
        let loaders = Arc::clone(&self.loaders);
        let path = document.path.clone();
        let format = document.format.clone();

        let (content_hash, segments) = tokio::task::spawn_blocking(move || {
            // The registry enforces the size limit before anything is read.
            let segments = loaders.load(&path, Some(&format))?;
            let hash = file_digest(&path)
                .map_err(|e| AppError::load(&path, format!("failed to read file: {}", e)))?;
            Ok::<_, AppError>((hash, segments))
        })
        .await??;

        Ok(LoadedDocument {
            document: document.clone(),
            content_hash,
            segments,
        })
    }

    async fn chunk_documents(
        &self,
        loaded: Vec<LoadedDocument>,
        previous: Option<Arc<IndexHandle>>,
    ) -> AppResult<Vec<ChunkedDocument>> {
        let chunker = Arc::clone(&self.chunker);

        tokio::task::spawn_blocking(move || {
            loaded
                .into_iter()
                .map(|doc| {
                    let reuse = previous.as_ref().and_then(|prev| {
                        let stored = prev.manifest().document(&doc.document.id)?;
                        if stored.content_hash != doc.content_hash {
                            return None;
                        }
                        let (passages, vectors): (Vec<Passage>, Vec<Vec<f32>>) = prev
                            .document_entries(&doc.document.id)
                            .map(|(p, v)| (p.clone(), v.to_vec()))
                            .unzip();
                        (passages.len() == stored.passage_count).then_some((passages, vectors))
                    });

                    let (passages, reused_vectors) = match reuse {
                        Some((passages, vectors)) => (passages, Some(vectors)),
                        None => (chunker.split(&doc.document.reference(), &doc.segments), None),
                    };

                    ChunkedDocument {
                        manifest: DocumentManifest {
                            document_id: doc.document.id.clone(),
                            file_name: doc.document.file_name.clone(),
                            content_hash: doc.content_hash,
                            passage_count: passages.len(),
                        },
                        passages,
                        reused_vectors,
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| AppError::index_build(BuildStage::Chunk, None, e.into()))
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Top `k` passages for `query`. Empty when the agent has no knowledge
    /// base; `Search` error when the index is unreadable or was built with a
    /// different embedding model.
    pub async fn search(
        &self,
        agent: &AgentId,
        query: &str,
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>> {
        let handle = match self.handle(agent).await? {
            Some(handle) => handle,
            None => {
                debug!(agent = %agent, "no knowledge base, empty search result");
                return Ok(Vec::new());
            }
        };

        let model_id = self.embeddings.model_id();
        if handle.manifest().embedding_model != model_id {
            return Err(AppError::search(format!(
                "index for agent {} was built with {}, current model is {}; rebuild required",
                agent,
                handle.manifest().embedding_model,
                model_id
            )));
        }
        if handle.is_empty() || k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embeddings.embed_query(query).await?;
        let results = self.index.search(handle, query_vector, k).await?;
        debug!(agent = %agent, k, results = results.len(), "knowledge base searched");
        Ok(results)
    }

    /// Cached handle, loading lazily.
    async fn handle(&self, agent: &AgentId) -> AppResult<Option<Arc<IndexHandle>>> {
        let generation = {
            let cache = self.handles.read().await;
            if let Some(handle) = cache.get(agent) {
                return Ok(Some(handle));
            }
            cache.generation(agent)
        };
        Ok(match self.index.load(agent).await? {
            Some(handle) => Some(self.handles.write().await.offer(agent, handle, generation)),
            None => None,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Remove the agent's knowledge base. Returns whether one existed.
    /// Rejected with `BuildInProgress` while a build for the agent runs.
    pub async fn delete_for_agent(&self, agent: &AgentId) -> AppResult<bool> {
        let _guard = BuildGuard::acquire(&self.building, agent)?;
        let existed = self.index.delete(agent).await;
        self.handles.write().await.invalidate(agent);
        existed
    }

    pub async fn stats(&self, agent: &AgentId) -> AppResult<Option<KnowledgeBaseStats>> {
        Ok(self.handle(agent).await?.map(|handle| {
            let manifest = handle.manifest();
            KnowledgeBaseStats {
                agent_id: agent.clone(),
                document_count: manifest.documents.len(),
                passage_count: handle.len(),
                embedding_model: manifest.embedding_model.clone(),
                dimension: manifest.dimension,
                created_at: manifest.created_at,
                documents: manifest.documents.clone(),
            }
        }))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hex SHA-256 of a file, streamed.
fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(File::open(path)?);
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hex_digest(&hasher.finalize()))
}
