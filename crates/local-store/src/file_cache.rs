//! File-backed collection cache.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use portal::{CachedCollection, CollectionKind, LocalCache, StoreError};
use tracing::{debug, warn};

use crate::atomic::write_atomic;

/// Persists each collection as `<dir>/<kind>.json`.
///
/// An entry that cannot be parsed is logged and reported as a miss so a
/// corrupt cache never blocks a read that the remote could satisfy.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Creates a cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory entries are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, kind: CollectionKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl LocalCache for FileCache {
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self, kind: CollectionKind) -> Result<Option<CachedCollection>, StoreError> {
        let path = self.entry_path(kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e)),
        };

        match serde_json::from_slice::<CachedCollection>(&bytes) {
            Ok(entry) if entry.kind == kind => {
                debug!(records = entry.records.len(), cached_at = %entry.cached_at, "cache hit");
                Ok(Some(entry))
            }
            Ok(entry) => {
                warn!(found = %entry.kind, path = %path.display(), "cache entry holds the wrong collection; ignoring");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "corrupt cache entry; ignoring");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self, entry), fields(kind = %entry.kind, records = entry.records.len()))]
    async fn save(&self, entry: &CachedCollection) -> Result<(), StoreError> {
        let path = self.entry_path(entry.kind);
        let body = serde_json::to_vec_pretty(entry).map_err(|e| StoreError::InvalidContent {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &body, None)
            .await
            .map_err(|e| io_error(&path, &e))?;
        debug!(path = %path.display(), "cache entry written");
        Ok(())
    }

    async fn remove(&self, kind: CollectionKind) -> Result<(), StoreError> {
        let path = self.entry_path(kind);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        for kind in CollectionKind::ALL {
            self.remove(kind).await?;
        }
        Ok(())
    }
}
