//! Upload Storage
//!
//! Persists uploaded files under `<upload_dir>/<agent>/<file_name>` and lists
//! them back as `Document`s for knowledge-base builds.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::models::document::Document;
use crate::utils::error::{AppError, AppResult};
use deusto_knowledge_core::AgentId;

const MAX_FILE_NAME_LEN: usize = 255;

pub struct UploadService {
    upload_dir: PathBuf,
    max_upload_bytes: u64,
}

impl UploadService {
    pub fn new(upload_dir: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_upload_bytes,
        }
    }

    pub fn agent_dir(&self, agent: &AgentId) -> PathBuf {
        self.upload_dir.join(agent.as_str())
    }

    /// Store `bytes` as `original_name` for `agent`, replacing a previous file
    /// of the same name.
    pub async fn store(
        &self,
        agent: &AgentId,
        original_name: &str,
        bytes: &[u8],
    ) -> AppResult<Document> {
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(AppError::upload(format!(
                "{} is {} bytes, limit is {}",
                original_name,
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        let file_name = sanitize_file_name(original_name)?;

        let dir = self.agent_dir(agent);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(&file_name);
        let tmp = dir.join(format!(".{}.upload-{}", file_name, uuid::Uuid::new_v4()));

        if let Err(e) = write_synced(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(agent = %agent, file = %file_name, bytes = bytes.len(), "document uploaded");
        Ok(Document::from_path(agent.clone(), path, bytes.len() as u64))
    }

    /// Documents stored for `agent`, sorted by file name.
    pub async fn list(&self, agent: &AgentId) -> AppResult<Vec<Document>> {
        let dir = self.agent_dir(agent);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name();
            if !metadata.is_file() || name.to_string_lossy().starts_with('.') {
                continue;
            }
            documents.push(Document::from_path(agent.clone(), entry.path(), metadata.len()));
        }
        documents.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(documents)
    }

    /// Remove one stored document. Returns whether it existed.
    pub async fn delete(&self, agent: &AgentId, file_name: &str) -> AppResult<bool> {
        let file_name = sanitize_file_name(file_name)?;
        match fs::remove_file(self.agent_dir(agent).join(&file_name)).await {
            Ok(()) => {
                info!(agent = %agent, file = %file_name, "document deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every stored document of `agent`.
    pub async fn delete_agent(&self, agent: &AgentId) -> AppResult<bool> {
        match fs::remove_dir_all(self.agent_dir(agent)).await {
            Ok(()) => {
                info!(agent = %agent, "agent uploads deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Keep only the final path component and replace characters that are unsafe
/// in file names. Names that end up empty or hidden are rejected.
pub fn sanitize_file_name(original: &str) -> AppResult<String> {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." || cleaned.starts_with('.') {
        return Err(AppError::upload(format!("invalid file name {:?}", original)));
    }
    if cleaned.len() > MAX_FILE_NAME_LEN {
        return Err(AppError::upload(format!(
            "file name longer than {} bytes",
            MAX_FILE_NAME_LEN
        )));
    }
    Ok(cleaned)
}
