//! Document Models
//!
//! Uploaded documents, the raw segments loaders extract from them, and the
//! passages that make up a knowledge base.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use deusto_knowledge_core::AgentId;

/// File format, derived from the extension (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "extension")]
pub enum DocumentFormat {
    Pdf,
    Text,
    Markdown,
    Csv,
    /// Handled by the generic fallback extractor.
    Other(String),
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "txt" => Self::Text,
            "md" | "markdown" => Self::Markdown,
            "csv" => Self::Csv,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_extension(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default(),
        )
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => f.write_str("pdf"),
            Self::Text => f.write_str("txt"),
            Self::Markdown => f.write_str("md"),
            Self::Csv => f.write_str("csv"),
            Self::Other(ext) if ext.is_empty() => f.write_str("unknown"),
            Self::Other(ext) => f.write_str(ext),
        }
    }
}

/// An uploaded file owned by one agent. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier within the agent (the stored file name).
    pub id: String,
    pub agent_id: AgentId,
    /// Name as shown to users in citations.
    pub file_name: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub size_bytes: u64,
}

impl Document {
    /// Describe a file already on disk.
    pub fn from_path(agent_id: AgentId, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: file_name.clone(),
            agent_id,
            format: DocumentFormat::from_path(&path),
            file_name,
            path,
            size_bytes,
        }
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef {
            document_id: self.id.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

/// One unit of text emitted by a loader: a PDF page, a CSV row, a sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSegment {
    pub text: String,
    /// Zero-based position of the segment within its document.
    pub index: usize,
}

impl RawSegment {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            index,
        }
    }
}

/// Citation back-reference to the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: String,
    pub file_name: String,
}

/// A contiguous window of document text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    /// Position within the whole knowledge base.
    pub ordinal: usize,
    /// Position within the source document.
    pub chunk_index: usize,
    /// Char offsets into the document's concatenated text, end exclusive.
    pub char_start: usize,
    pub char_end: usize,
    pub char_len: usize,
    pub byte_len: usize,
    /// Segment (page, row, sheet) holding the first character.
    pub segment_index: usize,
    pub source: DocumentRef,
}

/// A passage with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}
