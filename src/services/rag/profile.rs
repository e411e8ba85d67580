//! Agent Profile Sources
//!
//! The response assembler reads persona and generation parameters through
//! `AgentProfileSource` on every call, so edits in the external agent store
//! take effect on the next turn.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::agent::AgentProfile;
use crate::utils::error::{AppError, AppResult};
use deusto_knowledge_core::AgentId;

#[async_trait]
pub trait AgentProfileSource: Send + Sync {
    /// `None` when the store has no profile for `agent`.
    async fn profile(&self, agent: &AgentId) -> AppResult<Option<AgentProfile>>;
}

/// In-memory profiles, for embedding callers and tests.
#[derive(Default)]
pub struct StaticProfiles {
    profiles: RwLock<HashMap<AgentId, AgentProfile>>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: AgentProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.agent_id.clone(), profile);
    }
}

#[async_trait]
impl AgentProfileSource for StaticProfiles {
    async fn profile(&self, agent: &AgentId) -> AppResult<Option<AgentProfile>> {
        Ok(self.profiles.read().await.get(agent).cloned())
    }
}

/// One `<agent>.json` file per agent in a directory.
pub struct JsonFileProfiles {
    dir: PathBuf,
}

impl JsonFileProfiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AgentProfileSource for JsonFileProfiles {
    async fn profile(&self, agent: &AgentId) -> AppResult<Option<AgentProfile>> {
        let path = self.dir.join(format!("{}.json", agent.as_str()));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let profile: AgentProfile = serde_json::from_str(&content)?;
        if &profile.agent_id != agent {
            return Err(AppError::validation(format!(
                "{} declares agent {}",
                path.display(),
                profile.agent_id
            )));
        }
        Ok(Some(profile))
    }
}
