//! [`SyncEngine`]: read path, edits and the write worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use portal::{
    find, next_id, remove, resolve, upsert, BlobSha, CachedCollection, CollectionKind, LocalCache,
    PortalError, Record, RecordId, RemoteSnapshot, RemoteStore, StoreError, Timestamp, WriteJobId,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::queue::{Job, PendingWrite, WriteReceipt};
use crate::working::WorkingCollection;
use crate::SyncSettings;

/// Where the records returned by a load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// The in-memory working copy.
    Memory,
    /// A cache entry within its TTL.
    Cache,
    /// The remote store.
    Remote,
    /// A cache entry past its TTL, served because the remote failed.
    StaleCache,
}

/// How hard a load should try to reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Memory, then a fresh cache entry, then the remote; stale cache if the remote fails.
    #[default]
    PreferCache,
    /// Always ask the remote.
    Refresh,
}

/// Result of [`SyncEngine::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// The working copy after the load.
    pub records: Vec<Record>,
    /// Where `records` came from.
    pub source: DataSource,
    /// `true` if newer data was read but not applied because the working copy
    /// has unsaved edits or a write in flight.
    pub kept_local_edits: bool,
}

/// Per-collection state reported by [`SyncEngine::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStatus {
    /// The collection.
    pub kind: CollectionKind,
    /// Number of records in the working copy.
    pub records: usize,
    /// SHA the next write will be based on.
    pub sha: Option<BlobSha>,
    /// Unsaved local edits exist.
    pub dirty: bool,
    /// A write is currently being sent.
    pub in_flight: bool,
    /// Where the working copy was last loaded from.
    pub source: DataSource,
    /// When it was loaded.
    pub loaded_at: Timestamp,
}

/// State shared by every engine handle and the write worker.
struct Shared {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    settings: SyncSettings,
    working: Mutex<HashMap<CollectionKind, WorkingCollection>>,
    /// Writes committed per collection; a load compares it before and after reading.
    commits: Mutex<HashMap<CollectionKind, u64>>,
    /// Serializes cache saves so a slow read cannot land after a newer write.
    cache_writes: tokio::sync::Mutex<()>,
    pending: AtomicUsize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps an in-memory working copy of each collection in sync with a
/// [`LocalCache`] and a [`RemoteStore`].
///
/// Reads go memory → cache → remote. Edits apply to the working copy at once
/// and are written by a single background worker, one job at a time, in the
/// order they were queued. Cloning the engine is cheap; every clone shares
/// the same working copy and queue.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.shared.settings)
            .field("pending", &self.pending_writes())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates the engine and spawns its write worker on the current Tokio runtime.
    pub fn start(remote: Arc<dyn RemoteStore>, cache: Arc<dyn LocalCache>, settings: SyncSettings) -> Self {
        let shared = Arc::new(Shared {
            remote,
            cache,
            settings,
            working: Mutex::new(HashMap::new()),
            commits: Mutex::new(HashMap::new()),
            cache_writes: tokio::sync::Mutex::new(()),
            pending: AtomicUsize::new(0),
            worker: Mutex::new(None),
        });
        let (jobs, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(Arc::clone(&shared), receiver));
        *lock(&shared.worker) = Some(handle);
        Self { shared, jobs }
    }

    /// The settings the engine was started with.
    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Loads a collection into the working copy and returns it.
    #[tracing::instrument(skip_all, fields(kind = %kind, ?mode))]
    pub async fn load(&self, kind: CollectionKind, mode: LoadMode) -> Result<LoadOutcome, PortalError> {
        let shared = &self.shared;
        let ttl = shared.settings.cache_ttl;
        let now = Timestamp::now();
        let mark = shared.commit_mark(kind);

        if mode == LoadMode::PreferCache {
            if let Some(outcome) = shared.memory_hit(kind, now) {
                return Ok(outcome);
            }
            match shared.cache.load(kind).await {
                Ok(Some(entry)) if entry.is_fresh(ttl, now) => {
                    debug!(cached_at = %entry.cached_at, "serving fresh cache entry");
                    return Ok(shared.install(kind, entry.records, entry.sha, DataSource::Cache, entry.cached_at, mark));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cache read failed; going to the remote"),
            }
        }

        match shared.remote.fetch(kind).await {
            Ok(snapshot) => {
                let (records, sha) = match snapshot {
                    Some(RemoteSnapshot { records, sha }) => (records, Some(sha)),
                    None => (Vec::new(), None),
                };
                shared.refresh_cache(kind, &records, sha.clone(), mark).await;
                Ok(shared.install(kind, records, sha, DataSource::Remote, Timestamp::now(), mark))
            }
            Err(e) if mode == LoadMode::PreferCache => shared.fallback(kind, e, mark).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Loads every collection, stopping at the first failure.
    pub async fn load_all(&self, mode: LoadMode) -> Result<Vec<(CollectionKind, LoadOutcome)>, PortalError> {
        let mut outcomes = Vec::with_capacity(CollectionKind::ALL.len());
        for kind in CollectionKind::ALL {
            outcomes.push((kind, self.load(kind, mode).await?));
        }
        Ok(outcomes)
    }

    /// The records of a collection, loading it if needed.
    pub async fn records(&self, kind: CollectionKind) -> Result<Vec<Record>, PortalError> {
        Ok(self.load(kind, LoadMode::PreferCache).await?.records)
    }

    /// One record by id.
    pub async fn get(&self, kind: CollectionKind, id: RecordId) -> Result<Record, PortalError> {
        let records = self.records(kind).await?;
        find(&records, id)
            .cloned()
            .ok_or(PortalError::RecordNotFound { kind, id })
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Inserts or replaces a record and queues a write.
    ///
    /// A record without an `id` receives the next free id. Returns the id the
    /// record was stored under.
    #[tracing::instrument(skip_all, fields(kind = %kind))]
    pub async fn upsert(&self, kind: CollectionKind, record: Record) -> Result<(RecordId, PendingWrite), PortalError> {
        let declared = record.get("id").filter(|v| !v.is_null()).is_some();
        if declared && record.id().is_none() {
            return Err(PortalError::InvalidRecord {
                message: "`id` must be a non-negative integer".to_string(),
            });
        }
        self.ensure_loaded(kind).await?;

        let id = self.shared.edit(kind, |collection| {
            let (id, record) = match record.id() {
                Some(id) => (id, record),
                None => {
                    let id = next_id(&collection.records);
                    (id, record.with_id(id))
                }
            };
            upsert(&mut collection.records, record);
            collection.changes.record_edit(id);
            Ok(id)
        })?;

        info!(id = %id, "record saved locally");
        Ok((id, self.enqueue(kind)?))
    }

    /// Removes a record and queues a write.
    #[tracing::instrument(skip_all, fields(kind = %kind, id = %id))]
    pub async fn delete(&self, kind: CollectionKind, id: RecordId) -> Result<PendingWrite, PortalError> {
        self.ensure_loaded(kind).await?;
        self.shared.edit(kind, |collection| {
            if !remove(&mut collection.records, id) {
                return Err(PortalError::RecordNotFound { kind, id });
            }
            collection.changes.record_delete(id);
            Ok(())
        })?;
        info!(id = %id, "record deleted locally");
        self.enqueue(kind)
    }

    /// Replaces the whole collection and queues a write.
    ///
    /// Ids present before but absent from `records` count as deletions, and
    /// new or changed records as edits, when a conflict is merged.
    #[tracing::instrument(skip_all, fields(kind = %kind, records = records.len()))]
    pub async fn replace_all(&self, kind: CollectionKind, records: Vec<Record>) -> Result<PendingWrite, PortalError> {
        self.ensure_loaded(kind).await?;
        self.shared.edit(kind, |collection| {
            let previous = std::mem::replace(&mut collection.records, records);
            for old in &previous {
                if let Some(id) = old.id() {
                    if find(&collection.records, id).is_none() {
                        collection.changes.record_delete(id);
                    }
                }
            }
            for new in &collection.records {
                if let Some(id) = new.id() {
                    if find(&previous, id) != Some(new) {
                        collection.changes.record_edit(id);
                    }
                }
            }
            Ok(())
        })?;
        self.enqueue(kind)
    }

    /// Queues a write of the current working copy (e.g. to retry after a failure).
    pub fn save(&self, kind: CollectionKind) -> Result<PendingWrite, PortalError> {
        self.enqueue(kind)
    }

    // -----------------------------------------------------------------------
    // Queue control and introspection
    // -----------------------------------------------------------------------

    /// Resolves once every job queued before this call has completed.
    pub async fn flush(&self) -> Result<(), PortalError> {
        let (reply, done) = oneshot::channel();
        self.jobs.send(Job::Flush(reply)).map_err(|_| PortalError::QueueClosed)?;
        done.await.map_err(|_| PortalError::QueueClosed)
    }

    /// Drains the queue and stops the worker. Later edits fail with
    /// [`PortalError::QueueClosed`].
    pub async fn shutdown(&self) -> Result<(), PortalError> {
        self.flush().await?;
        // The worker may already be gone if another handle shut it down.
        let _ = self.jobs.send(Job::Shutdown);
        let handle = lock(&self.shared.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "write worker ended abnormally");
            }
        }
        Ok(())
    }

    /// Number of write jobs queued or running.
    pub fn pending_writes(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// State of every loaded collection, in display order.
    pub fn status(&self) -> Vec<CollectionStatus> {
        let working = lock(&self.shared.working);
        CollectionKind::ALL
            .into_iter()
            .filter_map(|kind| {
                working.get(&kind).map(|c| CollectionStatus {
                    kind,
                    records: c.records.len(),
                    sha: c.sha.clone(),
                    dirty: c.is_dirty(),
                    in_flight: c.in_flight,
                    source: c.source,
                    loaded_at: c.loaded_at,
                })
            })
            .collect()
    }

    /// Rate-limit state last reported by the remote.
    pub fn rate_limit(&self) -> Option<portal::RateLimitSnapshot> {
        self.shared.remote.rate_limit()
    }

    /// Drops the persisted cache and every clean working copy.
    pub async fn clear_cache(&self) -> Result<(), PortalError> {
        self.shared.cache.clear().await?;
        lock(&self.shared.working).retain(|_, c| c.is_pinned());
        Ok(())
    }

    async fn ensure_loaded(&self, kind: CollectionKind) -> Result<(), PortalError> {
        let loaded = lock(&self.shared.working).contains_key(&kind);
        if !loaded {
            self.load(kind, LoadMode::PreferCache).await?;
        }
        Ok(())
    }

    fn enqueue(&self, kind: CollectionKind) -> Result<PendingWrite, PortalError> {
        let id = WriteJobId::new_random();
        let (reply, receiver) = oneshot::channel();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(Job::Write { id, kind, reply }).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(PortalError::QueueClosed);
        }
        debug!(job = %id, kind = %kind, "write queued");
        Ok(PendingWrite::new(id, kind, receiver))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the map consistent, so a poisoned lock is still usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn memory_hit(&self, kind: CollectionKind, now: Timestamp) -> Option<LoadOutcome> {
        let working = lock(&self.working);
        let collection = working.get(&kind)?;
        let fresh = self.settings.cache_ttl.is_fresh(collection.loaded_at, now);
        (collection.is_pinned() || fresh).then(|| LoadOutcome {
            records: collection.records.clone(),
            source: DataSource::Memory,
            kept_local_edits: false,
        })
    }

    fn commit_mark(&self, kind: CollectionKind) -> u64 {
        lock(&self.commits).get(&kind).copied().unwrap_or(0)
    }

    /// Puts freshly read records into the working copy unless local edits
    /// are pending or a write committed after `mark` was taken. In either
    /// case the working copy is returned unchanged.
    fn install(
        &self,
        kind: CollectionKind,
        records: Vec<Record>,
        sha: Option<BlobSha>,
        source: DataSource,
        loaded_at: Timestamp,
        mark: u64,
    ) -> LoadOutcome {
        let mut working = lock(&self.working);
        if let Some(existing) = working.get(&kind) {
            if existing.is_pinned() || self.commit_mark(kind) != mark {
                debug!(kind = %kind, ?source, "local edits pending or committed during the read; keeping working copy");
                return LoadOutcome {
                    records: existing.records.clone(),
                    source: DataSource::Memory,
                    kept_local_edits: true,
                };
            }
        }
        working.insert(kind, WorkingCollection::new(records.clone(), sha, source, loaded_at));
        LoadOutcome {
            records,
            source,
            kept_local_edits: false,
        }
    }

    async fn fallback(&self, kind: CollectionKind, error: StoreError, mark: u64) -> Result<LoadOutcome, PortalError> {
        match self.cache.load(kind).await {
            Ok(Some(entry)) => {
                warn!(kind = %kind, error = %error, cached_at = %entry.cached_at, "remote unavailable; serving stale cache");
                Ok(self.install(kind, entry.records, entry.sha, DataSource::StaleCache, entry.cached_at, mark))
            }
            Ok(None) => Err(error.into()),
            Err(cache_error) => {
                warn!(kind = %kind, error = %cache_error, "cache read failed during fallback");
                Err(error.into())
            }
        }
    }

    /// Caches what a load read, unless a write committed since `mark`.
    async fn refresh_cache(&self, kind: CollectionKind, records: &[Record], sha: Option<BlobSha>, mark: u64) {
        let _guard = self.cache_writes.lock().await;
        if self.commit_mark(kind) != mark {
            debug!(kind = %kind, "write committed during the read; cache left as is");
            return;
        }
        self.save_cache(kind, records, sha).await;
    }

    async fn write_cache(&self, kind: CollectionKind, records: &[Record], sha: Option<BlobSha>) {
        let _guard = self.cache_writes.lock().await;
        self.save_cache(kind, records, sha).await;
    }

    async fn save_cache(&self, kind: CollectionKind, records: &[Record], sha: Option<BlobSha>) {
        let entry = CachedCollection {
            kind,
            records: records.to_vec(),
            sha,
            cached_at: Timestamp::now(),
        };
        if let Err(e) = self.cache.save(&entry).await {
            warn!(kind = %kind, error = %e, "could not update local cache");
        }
    }

    /// Applies `change` to a loaded collection and marks it dirty if the change succeeds.
    fn edit<T>(
        &self,
        kind: CollectionKind,
        change: impl FnOnce(&mut WorkingCollection) -> Result<T, PortalError>,
    ) -> Result<T, PortalError> {
        let mut working = lock(&self.working);
        let collection = working.entry(kind).or_insert_with(|| {
            WorkingCollection::new(Vec::new(), None, DataSource::Memory, Timestamp::now())
        });
        let out = change(collection)?;
        collection.touch();
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Write worker
    // -----------------------------------------------------------------------

    /// Writes the current working copy of `kind`, merging and retrying on
    /// conflict. Returns the result and the number of PUTs issued.
    async fn write(&self, job: WriteJobId, kind: CollectionKind) -> (Result<WriteReceipt, PortalError>, u32) {
        let mut attempts = 0;
        loop {
            let snapshot = {
                let mut working = lock(&self.working);
                match working.get_mut(&kind) {
                    Some(c) if c.is_dirty() => {
                        c.in_flight = true;
                        Ok((c.records.clone(), c.sha.clone(), c.generation))
                    }
                    Some(c) => Err(c.sha.clone()),
                    None => Err(None),
                }
            };
            let (records, base_sha, generation) = match snapshot {
                Ok(snapshot) => snapshot,
                Err(sha) => {
                    debug!("nothing to write");
                    return (Ok(WriteReceipt { job, kind, sha, attempts }), attempts);
                }
            };

            attempts += 1;
            let message = self.settings.commit_message(kind);
            match self.remote.store(kind, &records, base_sha.as_ref(), &message).await {
                Ok(sha) => {
                    self.committed(kind, generation, sha.clone());
                    self.write_cache(kind, &records, Some(sha.clone())).await;
                    info!(sha = %sha, attempts, "write committed");
                    return (Ok(WriteReceipt { job, kind, sha: Some(sha), attempts }), attempts);
                }
                Err(e) if e.is_conflict() => {
                    if attempts > self.settings.max_conflict_retries {
                        self.release(kind);
                        warn!(attempts, "giving up on conflicting write");
                        return (Err(PortalError::ConflictUnresolved { kind, attempts }), attempts);
                    }
                    warn!(attempts, strategy = %self.settings.conflict_strategy, "write conflict; merging with remote");
                    match self.remote.fetch(kind).await {
                        Ok(remote) => self.merge(kind, remote),
                        Err(e) => {
                            self.release(kind);
                            return (Err(e.into()), attempts);
                        }
                    }
                }
                Err(e) => {
                    self.release(kind);
                    warn!(error = %e, retry = ?e.retry_policy(Timestamp::now()), "write failed; edits stay pending");
                    return (Err(e.into()), attempts);
                }
            }
        }
    }

    fn committed(&self, kind: CollectionKind, generation: u64, sha: BlobSha) {
        let mut working = lock(&self.working);
        if let Some(c) = working.get_mut(&kind) {
            c.sha = Some(sha);
            c.in_flight = false;
            if c.generation == generation {
                c.changes.clear();
            } else {
                debug!(kind = %kind, "edits arrived during the write; collection stays dirty");
            }
            c.saved_generation = generation;
        }
        *lock(&self.commits).entry(kind).or_insert(0) += 1;
    }

    fn release(&self, kind: CollectionKind) {
        if let Some(c) = lock(&self.working).get_mut(&kind) {
            c.in_flight = false;
        }
    }

    fn merge(&self, kind: CollectionKind, remote: Option<RemoteSnapshot>) {
        let (remote_records, remote_sha) = match remote {
            Some(RemoteSnapshot { records, sha }) => (records, Some(sha)),
            None => (Vec::new(), None),
        };
        let mut working = lock(&self.working);
        if let Some(c) = working.get_mut(&kind) {
            c.records = resolve(self.settings.conflict_strategy, &remote_records, &c.records, &c.changes);
            c.sha = remote_sha;
            debug!(kind = %kind, records = c.records.len(), "merged with remote");
        }
    }
}

async fn run_worker(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Write { id, kind, reply } => {
                let span = info_span!("write_job", job = %id, kind = %kind);
                let (result, attempts) = shared.write(id, kind).instrument(span).await;
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                // The caller may have dropped its PendingWrite.
                let _ = reply.send(result);
                if attempts > 0 {
                    tokio::time::sleep(shared.settings.write_delay).await;
                }
            }
            Job::Flush(reply) => {
                let _ = reply.send(());
            }
            // Refuse new jobs but finish the ones already queued, so every
            // accepted job gets an answer and leaves the pending count.
            Job::Shutdown => jobs.close(),
        }
    }
    debug!("write worker stopped");
}
