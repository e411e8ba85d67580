//! Integration Tests Module
//!
//! End-to-end tests through `KnowledgeRuntime` with in-process providers:
//! uploads, background builds, search, retrieval-augmented answers and
//! configuration.

// Shared fixtures and mock providers
mod support;

// Upload -> build -> search lifecycle
mod knowledge_base_test;

// Build failures, tolerance and concurrency
mod build_failure_test;

// Response assembly against real knowledge bases
mod rag_test;

// Configuration file and environment overrides
mod config_test;
