//! Services
//!
//! Business logic for knowledge bases and retrieval-augmented chat.

pub mod embedding;
pub mod knowledge;
pub mod rag;
