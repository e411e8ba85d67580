//! Conversation Records
//!
//! Plain message types exchanged between the chat surface, the response
//! assembler and the conversational model.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Keep only the last `exchanges` user turns (and everything after the first
/// of them). System messages inside the history are dropped; the system
/// prompt is supplied separately.
pub fn recent_exchanges(history: &[ChatMessage], exchanges: usize) -> Vec<ChatMessage> {
    if exchanges == 0 {
        return Vec::new();
    }

    let mut seen = 0usize;
    let mut start = 0usize;
    for (idx, msg) in history.iter().enumerate().rev() {
        if msg.role == MessageRole::User {
            seen += 1;
            if seen == exchanges {
                start = idx;
                break;
            }
        }
    }

    history[start..]
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .cloned()
        .collect()
}
