mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{engine_with, ids, person, rec, settings, FakeRemote};
use local_store::MemoryCache;
use portal::{CollectionKind, ConflictStrategy, LocalCache, PortalError, RecordId, StoreError, Timestamp};
use serde_json::json;
use sync_engine::SyncSettings;
use tokio::sync::Semaphore;

#[tokio::test]
async fn upsert_assigns_the_next_id_and_commits() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Students, vec![person(1, "Ada"), person(4, "Grace")]);
    let cache = Arc::new(MemoryCache::new());
    let engine = engine_with(&remote, &cache, settings());

    let (id, pending) = engine
        .upsert(CollectionKind::Students, rec(json!({"name": "Barbara"})))
        .await
        .unwrap();
    let receipt = pending.wait().await.unwrap();

    assert_eq!(id, RecordId::new(5));
    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.sha, remote.sha(CollectionKind::Students));
    assert_eq!(ids(&remote.records(CollectionKind::Students)), vec![1, 4, 5]);

    let status = &engine.status()[0];
    assert!(!status.dirty);
    assert!(!status.in_flight);
    let entry = cache.load(CollectionKind::Students).await.unwrap().unwrap();
    assert_eq!(entry.sha, receipt.sha);
    assert_eq!(ids(&entry.records), vec![1, 4, 5]);
}

#[tokio::test]
async fn first_write_creates_the_file() {
    let remote = FakeRemote::new();
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let (id, pending) = engine.upsert(CollectionKind::Updates, rec(json!({"title": "Lab opens"}))).await.unwrap();
    pending.wait().await.unwrap();

    assert_eq!(id, RecordId::new(1));
    assert_eq!(remote.puts()[0].base_sha, None);
    assert_eq!(ids(&remote.records(CollectionKind::Updates)), vec![1]);
}

#[tokio::test]
async fn non_numeric_ids_are_rejected() {
    let remote = FakeRemote::new();
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let err = engine
        .upsert(CollectionKind::Projects, rec(json!({"id": "alpha", "title": "x"})))
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::InvalidRecord { .. }));
    assert_eq!(engine.pending_writes(), 0);
}

#[tokio::test]
async fn deleting_an_unknown_record_fails_without_queueing() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Advisors, vec![person(1, "Prof")]);
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let err = engine.delete(CollectionKind::Advisors, RecordId::new(2)).await.unwrap_err();

    assert!(matches!(err, PortalError::RecordNotFound { .. }));
    assert_eq!(engine.pending_writes(), 0);
    assert!(!engine.status()[0].dirty);
}

#[tokio::test]
async fn conflicting_write_is_merged_by_id() {
    let remote = FakeRemote::new();
    remote.put_remotely(
        CollectionKind::Students,
        vec![person(1, "Ada"), person(2, "Grace"), person(3, "Alan")],
    );
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());
    engine.load(CollectionKind::Students, sync_engine::LoadMode::PreferCache).await.unwrap();

    // Another admin edits Grace and adds Edsger after our read.
    remote.put_remotely(
        CollectionKind::Students,
        vec![person(1, "Ada"), person(2, "Grace Hopper"), person(3, "Alan"), person(4, "Edsger")],
    );

    engine.delete(CollectionKind::Students, RecordId::new(3)).await.unwrap();
    let (_, pending) = engine.upsert(CollectionKind::Students, person(1, "Ada Lovelace")).await.unwrap();
    pending.wait().await.unwrap();
    engine.flush().await.unwrap();

    let stored = remote.records(CollectionKind::Students);
    assert_eq!(ids(&stored), vec![1, 2, 4]);
    assert_eq!(stored[0].get("name").unwrap(), "Ada Lovelace");
    assert_eq!(stored[1].get("name").unwrap(), "Grace Hopper");
    assert_eq!(remote.puts().iter().filter(|p| !p.accepted).count(), 1);
    assert!(!engine.status()[0].dirty);
}

#[tokio::test]
async fn last_write_wins_overwrites_the_remote() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Projects, vec![person(1, "alpha")]);
    let settings = SyncSettings {
        conflict_strategy: ConflictStrategy::LastWriteWins,
        ..settings()
    };
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings);
    engine.load(CollectionKind::Projects, sync_engine::LoadMode::PreferCache).await.unwrap();
    remote.put_remotely(CollectionKind::Projects, vec![person(1, "alpha"), person(2, "beta")]);

    let (_, pending) = engine.upsert(CollectionKind::Projects, person(1, "alpha v2")).await.unwrap();
    let receipt = pending.wait().await.unwrap();

    assert_eq!(receipt.attempts, 2);
    assert_eq!(ids(&remote.records(CollectionKind::Projects)), vec![1]);
}

#[tokio::test]
async fn conflict_retries_are_bounded() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Updates, vec![person(1, "news")]);
    remote.always_conflict.store(true, Ordering::SeqCst);
    let settings = SyncSettings {
        max_conflict_retries: 2,
        ..settings()
    };
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings);

    let (_, pending) = engine.upsert(CollectionKind::Updates, person(2, "more news")).await.unwrap();
    let err = pending.wait().await.unwrap_err();

    assert_eq!(
        err,
        PortalError::ConflictUnresolved {
            kind: CollectionKind::Updates,
            attempts: 3
        }
    );
    assert_eq!(remote.puts().len(), 3);
    let status = &engine.status()[0];
    assert!(status.dirty);
    assert!(!status.in_flight);
}

#[tokio::test]
async fn rate_limited_write_stays_pending_and_can_be_retried() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Advisors, vec![person(1, "Prof")]);
    *remote.fail_store.lock().unwrap() = Some(StoreError::RateLimited { reset_at: Timestamp::now() });
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let (_, pending) = engine.upsert(CollectionKind::Advisors, person(2, "Dean")).await.unwrap();
    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, PortalError::Store(StoreError::RateLimited { .. })));
    assert!(engine.status()[0].dirty);

    *remote.fail_store.lock().unwrap() = None;
    let receipt = engine.save(CollectionKind::Advisors).unwrap().wait().await.unwrap();

    assert_eq!(receipt.attempts, 1);
    assert_eq!(ids(&remote.records(CollectionKind::Advisors)), vec![1, 2]);
    assert!(!engine.status()[0].dirty);
}

#[tokio::test]
async fn queued_edits_to_one_collection_collapse_into_one_put() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Students, vec![person(1, "Ada")]);
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let (_, first) = engine.upsert(CollectionKind::Students, person(2, "Grace")).await.unwrap();
    let (_, second) = engine.upsert(CollectionKind::Students, person(3, "Alan")).await.unwrap();
    let first = first.wait().await.unwrap();
    let second = second.wait().await.unwrap();

    assert_eq!(first.attempts, 1);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.sha, first.sha);
    assert_eq!(remote.accepted_puts(), 1);
    assert_eq!(ids(&remote.records(CollectionKind::Students)), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn writes_run_in_order_with_a_fixed_delay() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Students, vec![person(1, "Ada")]);
    remote.put_remotely(CollectionKind::Projects, vec![person(1, "alpha")]);
    remote.put_remotely(CollectionKind::Updates, vec![person(1, "news")]);
    let settings = SyncSettings {
        write_delay: Duration::from_millis(1500),
        ..settings()
    };
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings);

    let order = [CollectionKind::Projects, CollectionKind::Updates, CollectionKind::Students];
    let mut pending = Vec::new();
    for kind in order {
        let (_, write) = engine.upsert(kind, person(2, "added")).await.unwrap();
        pending.push(write);
    }
    assert_eq!(engine.pending_writes(), 3);
    engine.flush().await.unwrap();
    for write in pending {
        write.wait().await.unwrap();
    }

    let puts = remote.puts();
    let kinds: Vec<_> = puts.iter().map(|p| p.kind).collect();
    assert_eq!(kinds, order);
    for pair in puts.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(1500));
    }
    assert_eq!(engine.pending_writes(), 0);
}

#[tokio::test]
async fn edits_during_an_in_flight_write_are_written_next() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Publications, vec![person(1, "paper")]);
    let gate = Arc::new(Semaphore::new(0));
    *remote.store_gate.lock().unwrap() = Some(gate.clone());
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let (_, first) = engine.upsert(CollectionKind::Publications, person(2, "preprint")).await.unwrap();
    remote.store_entered.notified().await;
    assert!(engine.status()[0].in_flight);

    // Lands while the first PUT is blocked.
    let (_, second) = engine.upsert(CollectionKind::Publications, person(3, "talk")).await.unwrap();
    let during = engine.load(CollectionKind::Publications, sync_engine::LoadMode::Refresh).await.unwrap();
    assert!(during.kept_local_edits);

    gate.add_permits(2);
    let first = first.wait().await.unwrap();
    let second = second.wait().await.unwrap();

    assert_eq!(first.attempts, 1);
    assert_eq!(second.attempts, 1);
    assert_eq!(ids(&remote.records(CollectionKind::Publications)), vec![1, 2, 3]);
    assert!(!engine.status()[0].dirty);
}

#[tokio::test]
async fn replace_all_records_dropped_ids_as_deletions() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Students, vec![person(1, "a"), person(2, "b"), person(3, "c")]);
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());
    engine.load(CollectionKind::Students, sync_engine::LoadMode::PreferCache).await.unwrap();
    remote.put_remotely(
        CollectionKind::Students,
        vec![person(1, "a"), person(2, "b"), person(3, "c"), person(9, "remote")],
    );

    let pending = engine
        .replace_all(CollectionKind::Students, vec![person(1, "a"), person(3, "c2")])
        .await
        .unwrap();
    pending.wait().await.unwrap();

    let stored = remote.records(CollectionKind::Students);
    assert_eq!(ids(&stored), vec![1, 3, 9]);
    assert_eq!(stored[1].get("name").unwrap(), "c2");
}

#[tokio::test]
async fn shutdown_drains_then_rejects_new_writes() {
    let remote = FakeRemote::new();
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());
    let (_, pending) = engine.upsert(CollectionKind::Updates, person(1, "last")).await.unwrap();

    engine.shutdown().await.unwrap();

    assert!(pending.wait().await.is_ok());
    assert_eq!(remote.accepted_puts(), 1);
    let err = engine.upsert(CollectionKind::Updates, person(2, "late")).await.unwrap_err();
    assert_eq!(err, PortalError::QueueClosed);
    assert_eq!(engine.flush().await.unwrap_err(), PortalError::QueueClosed);
}

#[tokio::test]
async fn writes_queued_behind_shutdown_still_complete() {
    let remote = FakeRemote::new();
    remote.put_remotely(CollectionKind::Updates, vec![person(1, "first")]);
    let gate = Arc::new(Semaphore::new(0));
    *remote.store_gate.lock().unwrap() = Some(gate.clone());
    let engine = engine_with(&remote, &Arc::new(MemoryCache::new()), settings());

    let (_, first) = engine.upsert(CollectionKind::Updates, person(2, "a")).await.unwrap();
    remote.store_entered.notified().await;
    let stopping = tokio::spawn({
        let engine = engine.clone();
        async move { engine.shutdown().await }
    });
    tokio::task::yield_now().await;

    // Queued behind the shutdown's flush; the worker picks it up and blocks.
    let (_, second) = engine.upsert(CollectionKind::Updates, person(3, "b")).await.unwrap();
    gate.add_permits(1);
    remote.store_entered.notified().await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    // The shutdown signal is queued by now; this job lands behind it.
    let (_, third) = engine.upsert(CollectionKind::Updates, person(4, "c")).await.unwrap();

    gate.add_permits(2);
    stopping.await.unwrap().unwrap();

    assert!(first.wait().await.is_ok());
    assert!(second.wait().await.is_ok());
    assert!(third.wait().await.is_ok());
    assert_eq!(engine.pending_writes(), 0);
    assert_eq!(ids(&remote.records(CollectionKind::Updates)), vec![1, 2, 3, 4]);
    let err = engine.upsert(CollectionKind::Updates, person(5, "late")).await.unwrap_err();
    assert_eq!(err, PortalError::QueueClosed);
    assert_eq!(engine.pending_writes(), 0);
}
