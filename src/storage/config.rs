//! Configuration File
//!
//! `config.json` holds the stored `AppConfig`. Environment overrides are
//! layered on at read time and never written back; API keys are never
//! serialized.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::models::settings::{AppConfig, SettingsUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_dir};

#[derive(Debug)]
pub struct ConfigService {
    path: PathBuf,
    stored: AppConfig,
}

impl ConfigService {
    /// Open `~/.deusto-knowledge/config.json`.
    pub fn new() -> AppResult<Self> {
        Self::with_path(config_path()?)
    }

    /// Open `path`, writing defaults there first when it does not exist.
    pub fn with_path(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let stored = match fs::read_to_string(&path) {
            Ok(raw) => parse(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = AppConfig::default();
                write_atomic(&path, &defaults)?;
                info!(path = %path.display(), "wrote default configuration");
                defaults
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, stored })
    }

    pub fn stored(&self) -> &AppConfig {
        &self.stored
    }

    /// Stored configuration with process environment overrides applied.
    pub fn effective_config(&self) -> AppConfig {
        let mut config = self.stored.clone();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `update`, validate and persist. On error nothing changes.
    pub fn update_config(&mut self, update: SettingsUpdate) -> AppResult<AppConfig> {
        let mut candidate = self.stored.clone();
        candidate.apply_update(update);
        write_atomic(&self.path, &candidate)?;
        self.stored = candidate;
        Ok(self.stored.clone())
    }

    pub fn reset(&mut self) -> AppResult<()> {
        let defaults = AppConfig::default();
        write_atomic(&self.path, &defaults)?;
        self.stored = defaults;
        Ok(())
    }
}

fn parse(raw: &str) -> AppResult<AppConfig> {
    let config: AppConfig = serde_json::from_str(raw)?;
    config.validate().map_err(AppError::validation)?;
    Ok(config)
}

/// Validate, then replace `path` through a sibling temp file.
fn write_atomic(path: &Path, config: &AppConfig) -> AppResult<()> {
    config.validate().map_err(AppError::validation)?;
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
