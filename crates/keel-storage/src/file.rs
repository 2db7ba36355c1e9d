use std::path::{Path, PathBuf};

use keel_core::Snapshot;

use crate::error::StorageError;
use crate::store::{BoxFuture, CheckpointStore};

/// Snapshot persisted as pretty JSON in a single local file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file, then rename over the checkpoint, so a
    /// crash mid-write never leaves a truncated snapshot behind.
    async fn write_atomic(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            resources = snapshot.resources.len(),
            "checkpoint flushed to disk"
        );
        Ok(())
    }

    async fn read(&self) -> Result<Snapshot, StorageError> {
        let json = match tokio::fs::read(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    location: self.path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&json)?;
        tracing::debug!(path = %self.path.display(), "checkpoint loaded from disk");
        Ok(snapshot)
    }
}

impl CheckpointStore for FileStore {
    fn save<'a>(&'a self, snapshot: &'a Snapshot) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.write_atomic(snapshot))
    }

    fn load(&self) -> BoxFuture<'_, Result<Snapshot, StorageError>> {
        Box::pin(self.read())
    }
}
