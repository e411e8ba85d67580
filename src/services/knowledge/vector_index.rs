//! Vector Index
//!
//! Per-agent persisted collection of passages and their embeddings, searched
//! by an exact cosine scan.
//!
//! ## File layout (`<index_dir>/<agent>.kb`)
//!
//! ```text
//! "DKB1" | u32 LE header length | JSON header (manifest + passages) | f32 LE vectors
//! ```
//!
//! Builds write a temp file in the same directory, fsync it, and rename it over
//! the previous index, so readers only ever see a complete file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::document::{Passage, ScoredPassage};
use crate::services::knowledge::chunker::ChunkParams;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::ensure_dir;
use deusto_knowledge_core::AgentId;

pub const INDEX_MAGIC: &[u8; 4] = b"DKB1";
pub const INDEX_FORMAT_VERSION: u32 = 1;
const INDEX_EXTENSION: &str = "kb";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Per-document record kept for unchanged-document detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentManifest {
    pub document_id: String,
    pub file_name: String,
    /// Hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub passage_count: usize,
}

/// Self-description of a persisted knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub agent_id: AgentId,
    /// `EmbeddingManager::model_id()` of the provider that built the index.
    pub embedding_model: String,
    pub dimension: usize,
    pub chunking: ChunkParams,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<DocumentManifest>,
}

impl IndexManifest {
    pub fn new(
        agent_id: AgentId,
        embedding_model: impl Into<String>,
        dimension: usize,
        chunking: ChunkParams,
        documents: Vec<DocumentManifest>,
    ) -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            agent_id,
            embedding_model: embedding_model.into(),
            dimension,
            chunking,
            created_at: Utc::now(),
            documents,
        }
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentManifest> {
        self.documents.iter().find(|d| d.document_id == document_id)
    }
}

#[derive(Serialize, Deserialize)]
struct IndexHeader {
    manifest: IndexManifest,
    passages: Vec<Passage>,
}

// ---------------------------------------------------------------------------
// IndexHandle
// ---------------------------------------------------------------------------

/// An index loaded into memory. Immutable; shared as `Arc<IndexHandle>`.
#[derive(Debug)]
pub struct IndexHandle {
    manifest: IndexManifest,
    passages: Vec<Passage>,
    /// Row-major, `passages.len() * dimension`.
    vectors: Vec<f32>,
    norms: Vec<f32>,
}

impl IndexHandle {
    fn new(manifest: IndexManifest, passages: Vec<Passage>, vectors: Vec<f32>) -> Self {
        let dim = manifest.dimension.max(1);
        let norms = vectors
            .chunks(dim)
            .map(|v| v.iter().map(|x| x * x).sum::<f32>().sqrt())
            .collect();
        Self {
            manifest,
            passages,
            vectors,
            norms,
        }
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    pub fn vector(&self, i: usize) -> &[f32] {
        let dim = self.manifest.dimension;
        &self.vectors[i * dim..(i + 1) * dim]
    }

    /// Passages of one document with their stored vectors, in chunk order.
    pub fn document_entries<'a>(
        &'a self,
        document_id: &'a str,
    ) -> impl Iterator<Item = (&'a Passage, &'a [f32])> + 'a {
        self.passages
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.source.document_id == document_id)
            .map(move |(i, p)| (p, self.vector(i)))
    }

    /// Exact cosine scan. Highest score first, ties by ascending ordinal,
    /// at most `k` results.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<ScoredPassage>> {
        if query.len() != self.manifest.dimension {
            return Err(AppError::search(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.manifest.dimension
            )));
        }
        if k == 0 || self.passages.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mut scored: Vec<(usize, f32)> = (0..self.passages.len())
            .map(|i| {
                let denom = query_norm * self.norms[i];
                let score = if denom == 0.0 {
                    0.0
                } else {
                    let dot: f32 = self.vector(i).iter().zip(query).map(|(a, b)| a * b).sum();
                    dot / denom
                };
                (i, score)
            })
            .collect();

        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.total_cmp(sa)
                .then_with(|| self.passages[*ia].ordinal.cmp(&self.passages[*ib].ordinal))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredPassage {
                passage: self.passages[i].clone(),
                score,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// VectorIndex (storage)
// ---------------------------------------------------------------------------

/// Directory of per-agent index files.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    index_dir: PathBuf,
}

impl VectorIndex {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
        }
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn index_path(&self, agent: &AgentId) -> PathBuf {
        self.index_dir
            .join(format!("{}.{}", agent.as_str(), INDEX_EXTENSION))
    }

    pub fn exists(&self, agent: &AgentId) -> bool {
        self.index_path(agent).is_file()
    }

    /// Persist a fresh index, replacing any previous one only once the new
    /// file is complete on disk.
    pub async fn build(
        &self,
        manifest: IndexManifest,
        passages: Vec<Passage>,
        vectors: Vec<Vec<f32>>,
    ) -> AppResult<Arc<IndexHandle>> {
        validate_build(&manifest, &passages, &vectors)?;

        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let handle = IndexHandle::new(manifest, passages, flat);
        let path = self.index_path(&handle.manifest.agent_id);
        let dir = self.index_dir.clone();

        let handle = tokio::task::spawn_blocking(move || -> AppResult<IndexHandle> {
            write_index_file(&dir, &path, &handle)?;
            Ok(handle)
        })
        .await??;

        info!(
            agent = %handle.manifest.agent_id,
            passages = handle.len(),
            documents = handle.manifest.documents.len(),
            model = %handle.manifest.embedding_model,
            "knowledge base index written"
        );
        Ok(Arc::new(handle))
    }

    /// `None` when the agent has no knowledge base. A file that exists but
    /// cannot be read back is a `Search` error.
    pub async fn load(&self, agent: &AgentId) -> AppResult<Option<Arc<IndexHandle>>> {
        let path = self.index_path(agent);
        let expected = agent.clone();

        tokio::task::spawn_blocking(move || -> AppResult<Option<Arc<IndexHandle>>> {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(AppError::search(format!(
                        "failed to read index {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            let handle = decode_index(&bytes).map_err(|msg| {
                AppError::search(format!("corrupt index {}: {}", path.display(), msg))
            })?;
            if handle.manifest.agent_id != expected {
                return Err(AppError::search(format!(
                    "index {} belongs to agent {}",
                    path.display(),
                    handle.manifest.agent_id
                )));
            }
            debug!(agent = %expected, passages = handle.len(), "knowledge base index loaded");
            Ok(Some(Arc::new(handle)))
        })
        .await?
    }

    /// Scan `handle` off the async executor.
    pub async fn search(
        &self,
        handle: Arc<IndexHandle>,
        query: Vec<f32>,
        k: usize,
    ) -> AppResult<Vec<ScoredPassage>> {
        tokio::task::spawn_blocking(move || handle.search(&query, k)).await?
    }

    /// Remove the persisted index. Returns whether one existed.
    pub async fn delete(&self, agent: &AgentId) -> AppResult<bool> {
        match tokio::fs::remove_file(self.index_path(agent)).await {
            Ok(()) => {
                info!(agent = %agent, "knowledge base index deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_build(
    manifest: &IndexManifest,
    passages: &[Passage],
    vectors: &[Vec<f32>],
) -> AppResult<()> {
    if passages.len() != vectors.len() {
        return Err(AppError::internal(format!(
            "{} passages but {} vectors",
            passages.len(),
            vectors.len()
        )));
    }
    if !passages.is_empty() && manifest.dimension == 0 {
        return Err(AppError::internal("index dimension must be non-zero"));
    }
    for (i, (passage, vector)) in passages.iter().zip(vectors).enumerate() {
        if passage.ordinal != i {
            return Err(AppError::internal(format!(
                "passage ordinal {} at position {}",
                passage.ordinal, i
            )));
        }
        if vector.len() != manifest.dimension {
            return Err(AppError::internal(format!(
                "vector {} has dimension {}, expected {}",
                i,
                vector.len(),
                manifest.dimension
            )));
        }
    }
    Ok(())
}

fn write_index_file(dir: &Path, path: &Path, handle: &IndexHandle) -> AppResult<()> {
    ensure_dir(dir)?;

    let header = serde_json::to_vec(&IndexHeaderRef {
        manifest: &handle.manifest,
        passages: &handle.passages,
    })?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| AppError::internal("index header exceeds 4 GiB"))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    let result = (|| -> AppResult<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(INDEX_MAGIC)?;
        writer.write_all(&header_len.to_le_bytes())?;
        writer.write_all(&header)?;
        for value in &handle.vectors {
            writer.write_all(&value.to_le_bytes())?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| AppError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    } else if let Ok(d) = File::open(dir) {
        // Persist the rename itself; not supported on every platform.
        let _ = d.sync_all();
    }
    result
}

#[derive(Serialize)]
struct IndexHeaderRef<'a> {
    manifest: &'a IndexManifest,
    passages: &'a [Passage],
}

fn decode_index(bytes: &[u8]) -> Result<IndexHandle, String> {
    if bytes.len() < 8 || &bytes[..4] != INDEX_MAGIC {
        return Err("bad magic".to_string());
    }
    let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body = &bytes[8..];
    if body.len() < header_len {
        return Err("truncated header".to_string());
    }

    let header: IndexHeader = serde_json::from_slice(&body[..header_len])
        .map_err(|e| format!("invalid header: {}", e))?;
    if header.manifest.format_version != INDEX_FORMAT_VERSION {
        return Err(format!(
            "unsupported format version {}",
            header.manifest.format_version
        ));
    }

    check_header(&header)?;

    let vector_bytes = &body[header_len..];
    let expected = header
        .passages
        .len()
        .checked_mul(header.manifest.dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "vector section size overflows".to_string())?;
    if vector_bytes.len() != expected {
        return Err(format!(
            "expected {} bytes of vectors, found {}",
            expected,
            vector_bytes.len()
        ));
    }

    let vectors = vector_bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(IndexHandle::new(header.manifest, header.passages, vectors))
}

/// Invariants `validate_build` guarantees for files this crate wrote.
fn check_header(header: &IndexHeader) -> Result<(), String> {
    if !header.passages.is_empty() && header.manifest.dimension == 0 {
        return Err("zero dimension with stored passages".to_string());
    }
    match header
        .passages
        .iter()
        .enumerate()
        .find(|(i, p)| p.ordinal != *i)
    {
        Some((i, p)) => Err(format!("passage ordinal {} at position {}", p.ordinal, i)),
        None => Ok(()),
    }
}
