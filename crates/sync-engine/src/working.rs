//! The in-memory working copy of each collection.

use portal::{BlobSha, LocalChanges, Record, Timestamp};

use crate::DataSource;

/// One collection as the engine currently sees it.
///
/// `generation` counts local edits; `saved_generation` is the generation last
/// committed to the remote. The collection is dirty while they differ.
#[derive(Debug, Clone)]
pub(crate) struct WorkingCollection {
    pub records: Vec<Record>,
    /// SHA the next write is based on.
    pub sha: Option<BlobSha>,
    pub source: DataSource,
    pub loaded_at: Timestamp,
    pub generation: u64,
    pub saved_generation: u64,
    /// Ids edited or deleted since the last successful write.
    pub changes: LocalChanges,
    pub in_flight: bool,
}

impl WorkingCollection {
    pub fn new(records: Vec<Record>, sha: Option<BlobSha>, source: DataSource, loaded_at: Timestamp) -> Self {
        Self {
            records,
            sha,
            source,
            loaded_at,
            generation: 0,
            saved_generation: 0,
            changes: LocalChanges::default(),
            in_flight: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.generation != self.saved_generation
    }

    /// Dirty or mid-write: remote reads must not replace the records.
    pub fn is_pinned(&self) -> bool {
        self.is_dirty() || self.in_flight
    }

    pub fn touch(&mut self) {
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_pin_the_collection_until_saved() {
        let mut c = WorkingCollection::new(Vec::new(), None, DataSource::Remote, Timestamp::now());
        assert!(!c.is_pinned());
        c.touch();
        assert!(c.is_dirty());
        c.saved_generation = c.generation;
        assert!(!c.is_dirty());
        c.in_flight = true;
        assert!(c.is_pinned());
    }
}
