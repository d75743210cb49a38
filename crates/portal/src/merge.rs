//! Conflict resolution for SHA-guarded writes.
//!
//! When a write is rejected because the remote file moved on, the sync layer
//! re-reads the remote collection and asks [`resolve`] what to write next.
//! Neither strategy is a consistency protocol: last-write-wins discards the
//! remote change, merge-by-id keeps both sides at record granularity.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Record, RecordId};

/// How to combine local edits with a newer remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Local records overwrite the remote file wholesale.
    LastWriteWins,
    /// Shallow array merge keyed on the numeric `id` field.
    #[default]
    MergeById,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStrategy::LastWriteWins => f.write_str("last-write-wins"),
            ConflictStrategy::MergeById => f.write_str("merge-by-id"),
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "last-write-wins" => Ok(ConflictStrategy::LastWriteWins),
            "merge-by-id" => Ok(ConflictStrategy::MergeById),
            other => Err(format!(
                "unknown conflict strategy '{other}' (expected last-write-wins or merge-by-id)"
            )),
        }
    }
}

/// Ids touched locally since the last successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalChanges {
    /// Records inserted or modified locally.
    pub edited: HashSet<RecordId>,
    /// Records removed locally.
    pub deleted: HashSet<RecordId>,
}

impl LocalChanges {
    /// Notes an insert or update of `id`.
    pub fn record_edit(&mut self, id: RecordId) {
        self.deleted.remove(&id);
        self.edited.insert(id);
    }

    /// Notes a removal of `id`.
    pub fn record_delete(&mut self, id: RecordId) {
        self.edited.remove(&id);
        self.deleted.insert(id);
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.edited.is_empty() && self.deleted.is_empty()
    }

    /// Forgets everything recorded.
    pub fn clear(&mut self) {
        self.edited.clear();
        self.deleted.clear();
    }
}

/// Produces the records to write after a conflict.
///
/// - `remote`: the collection as it currently exists remotely.
/// - `local`: the working copy.
/// - `changes`: what was edited or deleted locally since the last successful write.
pub fn resolve(
    strategy: ConflictStrategy,
    remote: &[Record],
    local: &[Record],
    changes: &LocalChanges,
) -> Vec<Record> {
    match strategy {
        ConflictStrategy::LastWriteWins => local.to_vec(),
        ConflictStrategy::MergeById => merge_by_id(remote, local, changes),
    }
}

/// Remote order is kept. A local record replaces its remote counterpart only
/// if it was edited locally; a local record missing remotely is appended only
/// if it was edited locally (otherwise the remote deleted it).
fn merge_by_id(remote: &[Record], local: &[Record], changes: &LocalChanges) -> Vec<Record> {
    let mut merged: Vec<Record> = remote.to_vec();
    let mut positions: HashMap<RecordId, usize> = merged
        .iter()
        .enumerate()
        .filter_map(|(index, record)| record.id().map(|id| (id, index)))
        .collect();

    for record in local {
        match record.id() {
            Some(id) if changes.edited.contains(&id) => match positions.get(&id) {
                Some(&index) => merged[index] = record.clone(),
                None => {
                    positions.insert(id, merged.len());
                    merged.push(record.clone());
                }
            },
            Some(_) => {}
            None => {
                if !merged.contains(record) {
                    merged.push(record.clone());
                }
            }
        }
    }

    if !changes.deleted.is_empty() {
        merged.retain(|record| record.id().map_or(true, |id| !changes.deleted.contains(&id)));
    }
    merged
}
