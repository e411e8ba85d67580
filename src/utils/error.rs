//! Error Handling
//!
//! Unified error types for the application.
//! Uses thiserror for ergonomic error definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::embedding::EmbeddingError;
use deusto_knowledge_core::CoreError;
use deusto_knowledge_llm::LlmError;

/// Pipeline stage in which a knowledge-base build failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Load,
    Chunk,
    Embed,
    Persist,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Load => "load",
            BuildStage::Chunk => "chunk",
            BuildStage::Embed => "embed",
            BuildStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// A recognized document could not be read or parsed
    #[error("Failed to load {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    /// Neither a dedicated loader nor the generic fallback could read the file
    #[error("Unsupported document format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Chunk size / overlap combination is invalid
    #[error("Invalid chunking configuration: {0}")]
    ChunkConfig(String),

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// A knowledge-base build failed; the previous index is untouched
    #[error("Index build failed during {stage}{}: {source}", .document.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default())]
    IndexBuild {
        stage: BuildStage,
        document: Option<String>,
        #[source]
        source: Box<AppError>,
    },

    /// Index unreadable, corrupt or incompatible at query time
    #[error("Search error: {0}")]
    Search(String),

    /// A build for this agent is already running
    #[error("A knowledge base build is already in progress for agent {0}")]
    BuildInProgress(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Upload rejected (size, name)
    #[error("Upload rejected: {0}")]
    Upload(String),

    /// Conversational model failure
    #[error("Chat model error: {0}")]
    Chat(#[from] LlmError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn load(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn chunk_config(msg: impl Into<String>) -> Self {
        Self::ChunkConfig(msg.into())
    }

    /// Wrap `source` as a build failure at `stage`.
    pub fn index_build(stage: BuildStage, document: Option<String>, source: AppError) -> Self {
        Self::IndexBuild {
            stage,
            document,
            source: Box::new(source),
        }
    }

    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stage of a failed build, if this is one.
    pub fn build_stage(&self) -> Option<BuildStage> {
        match self {
            AppError::IndexBuild { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the failure was transient and retrying could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Embedding(e) => e.is_retryable(),
            AppError::Chat(e) => e.is_retryable(),
            AppError::IndexBuild { source, .. } => source.is_retryable(),
            AppError::BuildInProgress(_) => true,
            _ => false,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            AppError::Cancelled
        } else {
            AppError::internal(format!("background task failed: {}", err))
        }
    }
}

/// Convert AppError to a string for CLI and log output
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::load("/tmp/a.pdf", "bad xref table");
        assert_eq!(err.to_string(), "Failed to load /tmp/a.pdf: bad xref table");
    }

    #[test]
    fn test_index_build_reports_stage_and_document() {
        let err = AppError::index_build(
            BuildStage::Embed,
            Some("notes.md".to_string()),
            AppError::Embedding(EmbeddingError::Timeout { seconds: 30 }),
        );
        assert_eq!(err.build_stage(), Some(BuildStage::Embed));
        let msg = err.to_string();
        assert!(msg.contains("during embed"));
        assert!(msg.contains("notes.md"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_index_build_without_document() {
        let err = AppError::index_build(
            BuildStage::Persist,
            None,
            AppError::internal("disk full"),
        );
        assert_eq!(
            err.to_string(),
            "Index build failed during persist: Internal error: disk full"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_conversion() {
        let err = AppError::config("invalid setting");
        let msg: String = err.into();
        assert!(msg.contains("Configuration error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn test_core_error_conversion() {
        let app_err: AppError = CoreError::invalid_agent_id("", "must not be empty").into();
        assert!(matches!(app_err, AppError::Validation(_)));
    }
}
