//! Context Selection
//!
//! Turns search results into the context preamble injected ahead of the user
//! question, and into the citations returned to the chat surface.

use serde::{Deserialize, Serialize};

use crate::models::document::ScoredPassage;

/// Label prefixed to every injected passage.
pub const CONTEXT_LABEL: &str = "Relevant information: ";

const BLOCK_SEPARATOR: &str = "\n\n";
const PREVIEW_ELLIPSIS: &str = "...";

/// A retrieved passage as shown to the end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Passage text as it was injected into the prompt
    pub text: String,
    /// `text` cut for display
    pub preview: String,
    pub document_name: String,
    pub document_id: String,
    /// Page, row or sheet holding the start of the passage
    pub segment_index: usize,
    pub score: f32,
}

impl Citation {
    pub fn from_scored(scored: &ScoredPassage, preview_chars: usize) -> Self {
        let passage = &scored.passage;
        Self {
            text: passage.content.clone(),
            preview: preview(&passage.content, preview_chars),
            document_name: passage.source.file_name.clone(),
            document_id: passage.source.document_id.clone(),
            segment_index: passage.segment_index,
            score: scored.score,
        }
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], PREVIEW_ELLIPSIS),
        None => text.to_string(),
    }
}

/// Keep the best passages whose formatted context fits in `max_chars`.
///
/// Passages are ordered by descending score and dropped from the tail until
/// the context fits. A single passage that is still too long is truncated;
/// if not even the label fits, nothing is injected.
pub fn select_context(mut passages: Vec<ScoredPassage>, max_chars: usize) -> Vec<ScoredPassage> {
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));

    while passages.len() > 1 && context_len(&passages) > max_chars {
        passages.pop();
    }

    if context_len(&passages) > max_chars {
        let room = max_chars.saturating_sub(CONTEXT_LABEL.chars().count());
        match passages.first_mut() {
            Some(only) if room > 0 => {
                only.passage.content = only.passage.content.chars().take(room).collect();
            }
            _ => passages.clear(),
        }
    }
    passages
}

/// Render passages as labelled blocks separated by blank lines.
pub fn format_context(passages: &[ScoredPassage]) -> String {
    passages
        .iter()
        .map(|p| format!("{}{}", CONTEXT_LABEL, p.passage.content))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

fn context_len(passages: &[ScoredPassage]) -> usize {
    if passages.is_empty() {
        return 0;
    }
    let blocks: usize = passages
        .iter()
        .map(|p| CONTEXT_LABEL.chars().count() + p.passage.content.chars().count())
        .sum();
    blocks + BLOCK_SEPARATOR.len() * (passages.len() - 1)
}
