//! Cross-Platform Path Utilities
//!
//! Resolves the application directory (~/.deusto-knowledge/) and the default
//! locations of uploads and knowledge-base indexes beneath it.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the application directory (~/.deusto-knowledge/)
pub fn app_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".deusto-knowledge"))
}

/// Get the config file path (~/.deusto-knowledge/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(app_dir()?.join("config.json"))
}

/// Default directory for uploaded documents (~/.deusto-knowledge/uploads/)
pub fn default_upload_dir() -> PathBuf {
    app_dir()
        .map(|d| d.join("uploads"))
        .unwrap_or_else(|_| PathBuf::from("uploaded_files"))
}

/// Default directory for knowledge-base indexes (~/.deusto-knowledge/indexes/)
pub fn default_index_dir() -> PathBuf {
    app_dir()
        .map(|d| d.join("indexes"))
        .unwrap_or_else(|_| PathBuf::from("vector_stores"))
}

/// Default directory for agent profiles (~/.deusto-knowledge/agents/)
pub fn default_profiles_dir() -> PathBuf {
    app_dir()
        .map(|d| d.join("agents"))
        .unwrap_or_else(|_| PathBuf::from("agents"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
