pub mod settings;

pub use settings::{ConflictPolicy, LockSettings, MergeSettings, Settings, TransactionSettings};

use crate::errors::{StackError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global configuration directory (~/.patchstack/)
pub fn get_config_dir() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| StackError::config("Could not find home directory"))?;
    Ok(home_dir.join(".patchstack"))
}

/// Get the configuration directory for a repository, inside its git directory
pub fn get_repo_config_dir(git_dir: &Path) -> PathBuf {
    git_dir.join("patchstack")
}

/// Ensure the configuration directory exists
pub fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        fs::create_dir_all(config_dir).map_err(|e| {
            StackError::config(format!("Failed to create config directory: {e}"))
        })?;
    }

    Ok(())
}

/// Load the effective settings for a repository: defaults, then the global file,
/// then the repository file.
pub fn load_settings(git_dir: &Path) -> Result<Settings> {
    let mut layers = Vec::new();
    match get_config_dir() {
        Ok(dir) => layers.push(dir.join("config.json")),
        Err(e) => tracing::debug!("Skipping global config: {}", e),
    }
    layers.push(get_repo_config_dir(git_dir).join("config.json"));

    Settings::load_layered(&layers)
}
