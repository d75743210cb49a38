//! Atomic file replacement: write a sibling temp file, fsync, rename.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `contents` so readers see either the old or the new
/// file, never a partial one.
///
/// `mode` sets Unix permission bits on the temp file when it is created, so
/// the contents are never readable with wider permissions. It is ignored on
/// other platforms.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let (file, tmp_path) = create_temp(path, mode).await?;
    let written = finish(file, &tmp_path, path, contents).await;
    if written.is_err() {
        // Nothing else knows this name.
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    written
}

async fn finish(mut file: File, tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp_path, path).await
}

/// Creates a new, uniquely named sibling of `path`. Fails rather than reuse
/// an existing file.
async fn create_temp(path: &Path, mode: Option<u32>) -> std::io::Result<(File, PathBuf)> {
    let tmp_path = temp_path(path)?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        if let Some(mode) = mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    let file = options.open(&tmp_path).await?;
    Ok((file, tmp_path))
}

/// `.<name>.<pid>.<n>.tmp`, unique across processes and within this one.
fn temp_path(path: &Path) -> std::io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(".{}.{}.{n}.tmp", file_name.to_string_lossy(), std::process::id());
    Ok(path.with_file_name(tmp_name))
}
