//! Document Chunker
//!
//! Defines the `Chunker` trait and the sliding-window implementation used for
//! knowledge-base builds.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let chunker = SlidingWindowChunker::new(1000, 200)?;
//! let passages = chunker.split(&document.reference(), &segments);
//! ```

use serde::{Deserialize, Serialize};

use crate::models::document::{DocumentRef, Passage, RawSegment};
use crate::utils::error::{AppError, AppResult};

/// Joins segments of one document before windowing.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Trait for document chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split one document's segments into passages. `ordinal` on the returned
    /// passages equals `chunk_index`; the caller renumbers across documents.
    fn split(&self, document: &DocumentRef, segments: &[RawSegment]) -> Vec<Passage>;

    /// Parameters recorded in the index manifest.
    fn params(&self) -> ChunkParams;
}

/// Window size and overlap, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

// ---------------------------------------------------------------------------
// SlidingWindowChunker
// ---------------------------------------------------------------------------

/// Fixed-size character windows advancing by `chunk_size - overlap`.
///
/// Consecutive passages of one document share exactly `overlap` characters;
/// only the final passage may be shorter than `chunk_size`.
#[derive(Debug, Clone)]
pub struct SlidingWindowChunker {
    chunk_size: usize,
    overlap: usize,
}

impl SlidingWindowChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> AppResult<Self> {
        if chunk_size == 0 {
            return Err(AppError::chunk_config("chunk_size must be greater than zero"));
        }
        if overlap >= chunk_size {
            return Err(AppError::chunk_config(format!(
                "overlap ({}) must be strictly less than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_params(params: ChunkParams) -> AppResult<Self> {
        Self::new(params.chunk_size, params.overlap)
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Chunker for SlidingWindowChunker {
    fn split(&self, document: &DocumentRef, segments: &[RawSegment]) -> Vec<Passage> {
        // (char offset where the segment starts, segment index)
        let mut starts: Vec<(usize, usize)> = Vec::new();
        let mut chars: Vec<char> = Vec::new();

        for segment in segments.iter().filter(|s| !s.text.is_empty()) {
            if !chars.is_empty() {
                chars.extend(SEGMENT_SEPARATOR.chars());
            }
            starts.push((chars.len(), segment.index));
            chars.extend(segment.text.chars());
        }

        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let mut passages = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.chunk_size).min(total);
            let content: String = chars[start..end].iter().collect();
            let chunk_index = passages.len();

            passages.push(Passage {
                byte_len: content.len(),
                content,
                ordinal: chunk_index,
                chunk_index,
                char_start: start,
                char_end: end,
                char_len: end - start,
                segment_index: segment_at(&starts, start),
                source: document.clone(),
            });

            if end == total {
                break;
            }
            start += self.step();
        }

        passages
    }

    fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }
}

/// Index of the segment containing `offset`. Offsets inside a separator
/// belong to the preceding segment.
fn segment_at(starts: &[(usize, usize)], offset: usize) -> usize {
    let pos = starts.partition_point(|(s, _)| *s <= offset);
    starts[pos.saturating_sub(1)].1
}
