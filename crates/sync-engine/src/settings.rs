//! Tunables for the sync layer.

use std::time::Duration;

use portal::{CacheTtl, ConflictStrategy};

/// How the engine caches, paces and reconciles writes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// How long a cached or in-memory collection is served without asking the remote.
    pub cache_ttl: CacheTtl,
    /// Pause after every write job that contacted the remote.
    pub write_delay: Duration,
    /// How many times a conflicting write is merged and retried before giving up.
    pub max_conflict_retries: u32,
    /// How a conflicting write is reconciled with the newer remote file.
    pub conflict_strategy: ConflictStrategy,
    /// Prefix of every commit message (e.g. `"labportal: "`).
    pub commit_prefix: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cache_ttl: CacheTtl::default(),
            write_delay: Duration::from_secs(1),
            max_conflict_retries: 3,
            conflict_strategy: ConflictStrategy::default(),
            commit_prefix: "labportal: ".to_string(),
        }
    }
}

impl SyncSettings {
    pub(crate) fn commit_message(&self, kind: portal::CollectionKind) -> String {
        format!("{}update {}", self.commit_prefix, kind)
    }
}
