//! Personal access token storage.
//!
//! The token lives in a single file next to the cache. On Unix the file is
//! created with mode `0600`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::atomic::write_atomic;

const TOKEN_FILE_MODE: u32 = 0o600;

/// Errors from [`TokenStore`].
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token was empty or only whitespace.
    #[error("Access token must not be empty")]
    Empty,

    /// The token file could not be read or written.
    #[error("Token file {path}: {source}")]
    Io {
        /// The token file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Reads and writes the stored access token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored token, or `None` if none is stored.
    pub async fn load(&self) -> Result<Option<String>, TokenError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TokenError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Stores `token`, replacing any previous one.
    pub async fn save(&self, token: &str) -> Result<(), TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        write_atomic(&self.path, token.as_bytes(), Some(TOKEN_FILE_MODE))
            .await
            .map_err(|source| TokenError::Io {
                path: self.path.clone(),
                source,
            })?;
        tracing::info!(path = %self.path.display(), "access token stored");
        Ok(())
    }

    /// Deletes the stored token. Succeeds if there was none.
    pub async fn clear(&self) -> Result<(), TokenError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TokenError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
