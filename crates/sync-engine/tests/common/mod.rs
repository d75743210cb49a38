//! In-memory stand-in for the GitHub Contents API.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use local_store::MemoryCache;
use portal::{
    BlobSha, CacheTtl, CollectionKind, ConflictStrategy, RateLimitSnapshot, Record, RecordId,
    RemoteSnapshot, RemoteStore, StoreError, Timestamp,
};
use serde_json::{json, Value};
use sync_engine::{SyncEngine, SyncSettings};
use tokio::sync::{Notify, Semaphore};

pub fn rec(value: Value) -> Record {
    Record::from_value(value).unwrap()
}

pub fn person(id: u64, name: &str) -> Record {
    rec(json!({ "id": id, "name": name }))
}

pub fn ids(records: &[Record]) -> Vec<u64> {
    records.iter().filter_map(Record::id).map(RecordId::as_u64).collect()
}

#[derive(Debug, Clone)]
struct File {
    records: Vec<Record>,
    version: u64,
}

impl File {
    fn sha(&self) -> BlobSha {
        BlobSha::new(format!("sha-{}", self.version)).unwrap()
    }
}

/// A PUT the fake accepted or rejected.
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub kind: CollectionKind,
    pub base_sha: Option<BlobSha>,
    pub at: tokio::time::Instant,
    pub accepted: bool,
}

/// Remote store with SHA checking and knobs for failure injection.
#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<HashMap<CollectionKind, File>>,
    puts: Mutex<Vec<PutRecord>>,
    pub fetches: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_store: Mutex<Option<StoreError>>,
    pub always_conflict: AtomicBool,
    /// When set, every PUT waits for a permit before touching the file.
    pub store_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Signalled whenever a PUT starts.
    pub store_entered: Notify,
    /// When set, every fetch reads the file and then waits for a permit
    /// before answering, like a slow response already on the wire.
    pub fetch_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Signalled when a gated fetch has read the file.
    pub fetch_entered: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seeds or overwrites a file, as another editor would.
    pub fn put_remotely(&self, kind: CollectionKind, records: Vec<Record>) -> BlobSha {
        let mut files = self.files.lock().unwrap();
        let version = files.get(&kind).map_or(1, |f| f.version + 1);
        let file = File { records, version };
        let sha = file.sha();
        files.insert(kind, file);
        sha
    }

    pub fn records(&self, kind: CollectionKind) -> Vec<Record> {
        self.files.lock().unwrap().get(&kind).map(|f| f.records.clone()).unwrap_or_default()
    }

    pub fn sha(&self, kind: CollectionKind) -> Option<BlobSha> {
        self.files.lock().unwrap().get(&kind).map(File::sha)
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.puts.lock().unwrap().clone()
    }

    pub fn accepted_puts(&self) -> usize {
        self.puts().iter().filter(|p| p.accepted).count()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch(&self, kind: CollectionKind) -> Result<Option<RemoteSnapshot>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Transport { message: "connection reset".into() });
        }
        let snapshot = self.files.lock().unwrap().get(&kind).map(|f| RemoteSnapshot {
            records: f.records.clone(),
            sha: f.sha(),
        });
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.fetch_entered.notify_one();
            gate.acquire().await.unwrap().forget();
        }
        Ok(snapshot)
    }

    async fn store(
        &self,
        kind: CollectionKind,
        records: &[Record],
        base_sha: Option<&BlobSha>,
        _message: &str,
    ) -> Result<BlobSha, StoreError> {
        self.store_entered.notify_one();
        let gate = self.store_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let mut put = PutRecord {
            kind,
            base_sha: base_sha.cloned(),
            at: tokio::time::Instant::now(),
            accepted: false,
        };
        if let Some(err) = self.fail_store.lock().unwrap().clone() {
            self.puts.lock().unwrap().push(put);
            return Err(err);
        }

        let mut files = self.files.lock().unwrap();
        let current = files.get(&kind).map(File::sha);
        if self.always_conflict.load(Ordering::SeqCst) || current.as_ref() != base_sha {
            self.puts.lock().unwrap().push(put);
            return Err(StoreError::Conflict { path: format!("data/{}", kind.file_name()) });
        }
        let version = files.get(&kind).map_or(1, |f| f.version + 1);
        let file = File { records: records.to_vec(), version };
        let sha = file.sha();
        files.insert(kind, file);
        put.accepted = true;
        self.puts.lock().unwrap().push(put);
        Ok(sha)
    }

    fn rate_limit(&self) -> Option<RateLimitSnapshot> {
        Some(RateLimitSnapshot {
            limit: 5000,
            remaining: 4999 - self.fetch_count() as u32,
            used: 1,
            reset_at: Timestamp::now(),
            resource: "core".to_string(),
        })
    }
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        cache_ttl: CacheTtl::new(Duration::from_secs(300)),
        write_delay: Duration::from_millis(0),
        max_conflict_retries: 3,
        conflict_strategy: ConflictStrategy::MergeById,
        commit_prefix: "test: ".to_string(),
    }
}

pub fn engine_with(remote: &Arc<FakeRemote>, cache: &Arc<MemoryCache>, settings: SyncSettings) -> SyncEngine {
    SyncEngine::start(remote.clone(), cache.clone(), settings)
}
