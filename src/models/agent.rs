//! Agent Models
//!
//! Persona and generation settings read by the response assembler on every
//! call. Profiles are owned by an external store; this crate only reads them.

use serde::{Deserialize, Serialize};

use deusto_knowledge_core::AgentId;

/// Persona used when an agent has no stored profile.
pub const DEFAULT_PERSONALITY: &str =
    "You are a very kind and friendly virtual assistant holding a conversation with a human. Answer their questions cordially and with a touch of humor.";

/// Per-agent persona and model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: AgentId,
    /// Display name for the agent
    pub name: String,
    /// System prompt that defines the agent's behavior
    pub personality: String,
    /// Overrides the configured chat temperature when set
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Overrides the configured output token limit when set
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl AgentProfile {
    pub fn new(agent_id: AgentId, name: impl Into<String>, personality: impl Into<String>) -> Self {
        Self {
            agent_id,
            name: name.into(),
            personality: personality.into(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    /// Built-in assistant persona for agents without a profile.
    pub fn default_for(agent_id: AgentId) -> Self {
        let name = agent_id.to_string();
        Self::new(agent_id, name, DEFAULT_PERSONALITY)
    }

    /// Builder pattern: set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Builder pattern: set output token limit
    pub fn with_max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_tokens);
        self
    }
}
