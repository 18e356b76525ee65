//! JSON persistence of the workflow registry across restarts.

use std::path::{Path, PathBuf};

use stagehand_core::workflow::RegistrySnapshot;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Reads and writes one snapshot file.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never leaves a truncated snapshot behind.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Persist `snapshot` as pretty-printed JSON.
    pub async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::info!(
            path = %self.path.display(),
            records = snapshot.active_workflows.len(),
            results = snapshot.completed_workflows.len(),
            "saved workflow snapshot"
        );
        Ok(())
    }

    /// Read the snapshot, distinguishing "absent" from "broken".
    pub async fn read(&self) -> Result<Option<RegistrySnapshot>, SnapshotError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Read the snapshot for a startup restore.
    ///
    /// A missing file is normal on first run and yields `None` quietly; an
    /// unreadable or malformed file is logged and also yields `None`.
    pub async fn load(&self) -> Option<RegistrySnapshot> {
        match self.read().await {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "no workflow snapshot found");
                None
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "ignoring unreadable workflow snapshot");
                None
            }
        }
    }
}
