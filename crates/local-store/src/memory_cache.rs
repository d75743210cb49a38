//! In-process collection cache.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use portal::{CachedCollection, CollectionKind, LocalCache, StoreError};

/// Keeps cache entries in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CollectionKind, CachedCollection>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = CachedCollection>) -> Self {
        let cache = Self::new();
        {
            let mut map = cache.lock();
            for entry in entries {
                map.insert(entry.kind, entry);
            }
        }
        cache
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CollectionKind, CachedCollection>> {
        // A poisoned map still holds consistent entries; each insert is a single call.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn load(&self, kind: CollectionKind) -> Result<Option<CachedCollection>, StoreError> {
        Ok(self.lock().get(&kind).cloned())
    }

    async fn save(&self, entry: &CachedCollection) -> Result<(), StoreError> {
        self.lock().insert(entry.kind, entry.clone());
        Ok(())
    }

    async fn remove(&self, kind: CollectionKind) -> Result<(), StoreError> {
        self.lock().remove(&kind);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }
}
