//! Core Error Types

use thiserror::Error;

/// Rejections raised while constructing core records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid agent id {id:?}: {reason}")]
    InvalidAgentId { id: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn invalid_agent_id(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAgentId {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
