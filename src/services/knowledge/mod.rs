//! Knowledge System
//!
//! Per-agent knowledge bases:
//! - `loader`: format-specific text extraction
//! - `chunker`: sliding-window passage splitting
//! - `vector_index`: persisted passages + vectors, exact cosine search
//! - `manager`: build and search orchestration
//! - `jobs`: background builds with status and cancellation
//! - `upload`: uploaded-file storage

pub mod chunker;
pub mod jobs;
pub mod loader;
pub mod manager;
pub mod upload;
pub mod vector_index;

pub use chunker::{ChunkParams, Chunker, SlidingWindowChunker};
pub use jobs::{BuildJob, BuildScheduler, BuildStatus};
pub use loader::{DocumentLoader, LoaderRegistry};
pub use manager::{BuildReport, KnowledgeBaseManager, KnowledgeBaseStats, SkippedDocument};
pub use upload::UploadService;
pub use vector_index::{DocumentManifest, IndexHandle, IndexManifest, VectorIndex};
