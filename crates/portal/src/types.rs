//! Shared value types for the lab content domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. a record is always a JSON object, a
//! cache entry knows when it was written) and participate in domain
//! computations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BlobSha, RecordId};

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// The content collections published by the lab site.
///
/// Each collection lives in its own JSON file (`<name>.json`) holding an array
/// of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Faculty advisors.
    Advisors,
    /// Current and former students.
    Students,
    /// Research projects.
    Projects,
    /// Papers, talks and other publications.
    Publications,
    /// News items shown on the front page.
    Updates,
}

impl CollectionKind {
    /// Every collection, in display order.
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::Advisors,
        CollectionKind::Students,
        CollectionKind::Projects,
        CollectionKind::Publications,
        CollectionKind::Updates,
    ];

    /// The collection's name as used in file names and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Advisors => "advisors",
            CollectionKind::Students => "students",
            CollectionKind::Projects => "projects",
            CollectionKind::Publications => "publications",
            CollectionKind::Updates => "updates",
        }
    }

    /// The JSON file backing this collection (e.g. `"students.json"`).
    pub fn file_name(self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Error returned when a string names no known collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection '{0}' (expected one of advisors, students, projects, publications, updates)")]
pub struct UnknownCollection(pub String);

impl std::str::FromStr for CollectionKind {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CollectionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One entry of a collection: an arbitrary JSON object.
///
/// The only field the sync layer interprets is `id`. Everything else is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Wraps a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Converts an arbitrary JSON value, returning `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// The record's numeric id.
    ///
    /// Accepts non-negative integers and integer-valued strings (older files
    /// were hand-edited and mix both).
    pub fn id(&self) -> Option<RecordId> {
        match self.0.get("id")? {
            Value::Number(n) => n.as_u64().map(RecordId::new),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns the record with its `id` field set to `id`.
    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.0.insert("id".to_string(), Value::from(id.as_u64()));
        self
    }

    /// Reads a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Borrows the underlying JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts back into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Returns the id a new record should receive: one past the highest id in
/// `records`, or 1 for a collection without numbered records.
pub fn next_id(records: &[Record]) -> RecordId {
    records
        .iter()
        .filter_map(Record::id)
        .max()
        .map_or(RecordId::new(1), RecordId::next)
}

/// Finds the record with the given id.
pub fn find(records: &[Record], id: RecordId) -> Option<&Record> {
    records.iter().find(|r| r.id() == Some(id))
}

/// Replaces the record sharing `record`'s id in place, or appends it.
///
/// Records without an id are always appended.
pub fn upsert(records: &mut Vec<Record>, record: Record) {
    let slot = record
        .id()
        .and_then(|id| records.iter().position(|r| r.id() == Some(id)));
    match slot {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
}

/// Removes every record with the given id. Returns `true` if anything was removed.
pub fn remove(records: &mut Vec<Record>, id: RecordId) -> bool {
    let before = records.len();
    records.retain(|r| r.id() != Some(id));
    records.len() != before
}

/// Parses a collection file body: a JSON array of objects.
pub fn parse_records(body: &[u8]) -> Result<Vec<Record>, String> {
    let value: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let Value::Array(items) = value else {
        return Err("expected a JSON array of records".to_string());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            Record::from_value(item).ok_or_else(|| format!("element {index} is not a JSON object"))
        })
        .collect()
}

/// Renders a collection file body: pretty-printed, two-space indent, trailing newline.
pub fn render_records(records: &[Record]) -> String {
    // Serialising maps of JSON values cannot fail.
    let mut body = serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string());
    body.push('\n');
    body
}

// ---------------------------------------------------------------------------
// Remote and cached snapshots
// ---------------------------------------------------------------------------

/// A collection as read from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    /// Records in file order.
    pub records: Vec<Record>,
    /// Blob SHA of the file the records were read from.
    pub sha: BlobSha,
}

/// How long a cached collection may be served without asking the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtl(Duration);

impl CacheTtl {
    /// Creates a TTL. A zero duration means entries are never fresh.
    pub fn new(ttl: Duration) -> Self {
        Self(ttl)
    }

    /// Returns the TTL as a [`Duration`].
    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// Returns `true` if something stored at `stored_at` is still fresh at `now`.
    ///
    /// Timestamps in the future (clock skew between runs) count as fresh.
    pub fn is_fresh(self, stored_at: Timestamp, now: Timestamp) -> bool {
        if self.0.is_zero() {
            return false;
        }
        match (now.as_datetime() - stored_at.as_datetime()).to_std() {
            Ok(age) => age < self.0,
            Err(_) => true,
        }
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self(Duration::from_secs(300))
    }
}

/// A collection persisted in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCollection {
    /// Which collection this is.
    pub kind: CollectionKind,
    /// Records in file order.
    pub records: Vec<Record>,
    /// SHA of the remote file the records correspond to, if known.
    pub sha: Option<BlobSha>,
    /// When the entry was written.
    pub cached_at: Timestamp,
}

impl CachedCollection {
    /// Returns `true` if the entry is within `ttl` at `now`.
    pub fn is_fresh(&self, ttl: CacheTtl, now: Timestamp) -> bool {
        ttl.is_fresh(self.cached_at, now)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from seconds since the Unix epoch.
    pub fn from_unix(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Time elapsed between `earlier` and `self`, or zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns the timestamp shifted back by `by`.
    #[must_use]
    pub fn minus(self, by: Duration) -> Self {
        chrono::Duration::from_std(by)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map_or(self, Self)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
