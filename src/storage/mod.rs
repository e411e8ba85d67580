//! Storage Layer
//!
//! Persistent configuration. Documents and indexes are stored by their
//! owning services.

pub mod config;

pub use config::*;
