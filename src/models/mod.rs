//! Data Models
//!
//! Contains all data structures used throughout the application.

pub mod agent;
pub mod document;
pub mod settings;

pub use agent::*;
pub use document::*;
pub use settings::*;
