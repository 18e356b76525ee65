//! Data directory layout for Stagehand.
//!
//! Everything the server persists lives under one directory: `config.toml`
//! and the registry snapshot file.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STAGEHAND_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STAGEHAND_DATA_DIR` environment variable
/// 2. `~/.stagehand`
/// 3. `./.stagehand`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stagehand");
    }

    PathBuf::from(".stagehand")
}

/// Path of the registry snapshot file inside `data_dir`.
pub fn snapshot_path(data_dir: &Path, file_name: &str) -> PathBuf {
    data_dir.join(file_name)
}

/// Create the data directory if it does not exist yet.
pub async fn ensure_data_dir(data_dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_dir).await
}
