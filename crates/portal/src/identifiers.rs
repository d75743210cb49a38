//! Identifiers for repositories, files, records and write jobs.
//!
//! Git names and SHAs are all strings on the wire; each gets its own type so a
//! [`BlobSha`] cannot be passed where a [`BranchName`] is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// String-backed (Git names)
// ---------------------------------------------------------------------------

string_id! {
    /// A Git branch name (e.g. `"main"`, `"gh-pages"`).
    BranchName
}

string_id! {
    /// A Git blob SHA as reported by the Contents API.
    ///
    /// Used as the optimistic-concurrency guard on every write: a PUT names
    /// the SHA it was based on and GitHub rejects it if the file moved on.
    BlobSha
}

string_id! {
    /// A file-system path relative to the repository root (e.g. `"data"`).
    ContentPath
}

impl ContentPath {
    /// Joins a file name onto this directory path with a single `/`.
    pub fn join(&self, file_name: &str) -> String {
        let dir = self.0.trim_matches('/');
        if dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{dir}/{file_name}")
        }
    }
}

// ---------------------------------------------------------------------------

/// Identifies a GitHub repository in `"owner/repo"` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryId {
    owner: String,
    name: String,
}

impl RepositoryId {
    /// Parses `"owner/repo"`, returning `None` unless both halves are present
    /// and non-empty and there is exactly one separator.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let (owner, name) = value.as_ref().trim().split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Builds an identifier from its two halves.
    pub fn from_parts(owner: impl AsRef<str>, name: impl AsRef<str>) -> Option<Self> {
        Self::new(format!("{}/{}", owner.as_ref(), name.as_ref()))
    }

    /// The account or organisation that owns the repository.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The repository name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TryFrom<String> for RepositoryId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| format!("invalid repository '{value}', expected owner/repo"))
    }
}

impl From<RepositoryId> for String {
    fn from(value: RepositoryId) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Integer-backed
// ---------------------------------------------------------------------------

/// Numeric identity of a record inside a collection.
///
/// Records carry it in their `id` field. Merges and edits match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Creates a new identifier from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The identifier after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// ---------------------------------------------------------------------------
// UUID-backed
// ---------------------------------------------------------------------------

/// Identifies one queued write.
///
/// Generated when an edit is enqueued; propagated through spans so the
/// request, conflict retries and the final receipt can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteJobId(Uuid);

impl WriteJobId {
    /// Generates a new random job identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for WriteJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
