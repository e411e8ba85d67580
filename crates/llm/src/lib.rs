//! Deusto Knowledge LLM
//!
//! Provides the conversational model abstraction used by the response
//! assembler, an OpenAI-compatible implementation, and the HTTP client
//! factory shared with the embedding providers.

pub mod http_client;
pub mod openai;
pub mod provider;
pub mod types;

// Re-export main types
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use types::*;
