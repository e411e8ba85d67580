//! Deusto Knowledge - Agent Knowledge Base & Retrieval Core
//!
//! Per-agent document ingestion and retrieval-augmented responses.
//! It includes:
//! - Document loading, chunking, embedding and persisted vector indexes
//! - Background builds with status and cancellation
//! - The response assembler used by the chat surface
//! - JSON configuration and utilities

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use models::agent::AgentProfile;
pub use models::document::{Document, DocumentFormat, Passage, ScoredPassage};
pub use models::settings::{AppConfig, SettingsUpdate};
pub use services::knowledge::{BuildReport, BuildStatus, KnowledgeBaseManager};
pub use services::rag::{Citation, RagResponse, ResponseAssembler};
pub use state::KnowledgeRuntime;
pub use utils::error::{AppError, AppResult, BuildStage};

pub use deusto_knowledge_core::{AgentId, ChatMessage, MessageRole};
