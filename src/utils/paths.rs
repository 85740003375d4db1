//! Cross-Platform Path Utilities
//!
//! Functions for resolving application directories across platforms.
//! Everything lives under `~/.insight-sync/`.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Insight Sync directory (~/.insight-sync/)
pub fn insight_sync_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".insight-sync"))
}

/// Get the config file path (~/.insight-sync/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(insight_sync_dir()?.join("config.json"))
}

/// Get the database file path (~/.insight-sync/data.db)
pub fn database_path() -> AppResult<PathBuf> {
    Ok(insight_sync_dir()?.join("data.db"))
}

/// Get the local cache snapshot path for one execution context
/// (~/.insight-sync/local-cache/{context}.json)
pub fn local_cache_path(context_id: &str) -> AppResult<PathBuf> {
    let file: String = context_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if file.is_empty() {
        return Err(AppError::config("context name must not be empty"));
    }
    Ok(insight_sync_dir()?.join("local-cache").join(format!("{}.json", file)))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the Insight Sync directory, creating if it doesn't exist
pub fn ensure_insight_sync_dir() -> AppResult<PathBuf> {
    let path = insight_sync_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
