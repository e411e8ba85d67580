//! Deusto Knowledge Core
//!
//! Records shared across the workspace: validated agent identifiers and
//! conversation messages. Depends on nothing else in the workspace.

pub mod agent;
pub mod conversation;
pub mod error;

pub use agent::AgentId;
pub use conversation::{recent_exchanges, ChatMessage, MessageRole};
pub use error::{CoreError, CoreResult};
