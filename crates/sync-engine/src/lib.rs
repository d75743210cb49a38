//! Lab content synchronization layer.
//!
//! This crate drives the three copies of every collection:
//!
//! 1. the **working copy** held in memory by [`SyncEngine`],
//! 2. the **local cache** behind [`portal::LocalCache`], served while within its TTL,
//! 3. the **remote store** behind [`portal::RemoteStore`], written with
//!    SHA-guarded PUTs.
//!
//! Edits land in the working copy immediately and are persisted by a single
//! background worker that processes a FIFO queue with a fixed pause between
//! remote writes. A write rejected for a stale SHA is reconciled with the
//! configured [`portal::ConflictStrategy`] and retried.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences calls between the domain
//! rules in [`portal`] and the infrastructure ports. It never touches HTTP or
//! the file system directly.

mod engine;
mod queue;
mod settings;
mod working;

pub use engine::{CollectionStatus, DataSource, LoadMode, LoadOutcome, SyncEngine};
pub use queue::{PendingWrite, WriteReceipt};
pub use settings::SyncSettings;
