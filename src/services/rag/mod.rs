//! Retrieval-Augmented Responses
//!
//! - `profile`: per-agent persona lookup
//! - `context`: context budget, prompt blocks and citations
//! - `assembler`: the chat turn itself

pub mod assembler;
pub mod context;
pub mod profile;

pub use assembler::{build_user_message, PassageRetriever, RagResponse, ResponseAssembler};
pub use context::{format_context, preview, select_context, Citation};
pub use profile::{AgentProfileSource, JsonFileProfiles, StaticProfiles};
