//! Port traits implemented by infrastructure crates.
//!
//! The sync layer only ever sees these traits. The GitHub adapter implements
//! [`RemoteStore`]; the local-store crate implements [`LocalCache`].

use async_trait::async_trait;

use crate::{BlobSha, CachedCollection, CollectionKind, RateLimitSnapshot, Record, RemoteSnapshot, StoreError};

/// The remote JSON store holding the authoritative copy of each collection.
///
/// Writes are optimistic: `store` names the blob SHA it was based on and must
/// fail with [`StoreError::Conflict`] if the remote file has changed since.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads a collection. Returns `Ok(None)` if its file does not exist yet.
    async fn fetch(&self, kind: CollectionKind) -> Result<Option<RemoteSnapshot>, StoreError>;

    /// Writes a collection, returning the SHA of the new file.
    ///
    /// `base_sha` is `None` when creating the file.
    async fn store(
        &self,
        kind: CollectionKind,
        records: &[Record],
        base_sha: Option<&BlobSha>,
        message: &str,
    ) -> Result<BlobSha, StoreError>;

    /// The most recent rate-limit state, if any response has been seen.
    fn rate_limit(&self) -> Option<RateLimitSnapshot>;
}

/// The locally persisted copy of each collection.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Reads a cached collection. Returns `Ok(None)` on a miss.
    async fn load(&self, kind: CollectionKind) -> Result<Option<CachedCollection>, StoreError>;

    /// Replaces the cached copy of `entry.kind`.
    async fn save(&self, entry: &CachedCollection) -> Result<(), StoreError>;

    /// Drops the cached copy of a collection.
    async fn remove(&self, kind: CollectionKind) -> Result<(), StoreError>;

    /// Drops every cached collection.
    async fn clear(&self) -> Result<(), StoreError>;
}
