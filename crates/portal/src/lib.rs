//! Core domain for the lab content store.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, merge rule and error type used throughout the workspace.
//! Infrastructure crates implement the traits defined here; they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RepositoryId`, `BlobSha`, `RecordId`, etc.) |
//! | [`types`] | Collections, records, cache entries, timestamps |
//! | [`merge`] | Conflict strategies for rejected SHA-guarded writes |
//! | [`rate_limit`] | Parsed `x-ratelimit-*` state |
//! | [`ports`] | `RemoteStore` and `LocalCache` traits |
//! | [`errors`] | Error and retry-policy types |

pub mod errors;
pub mod identifiers;
pub mod merge;
pub mod ports;
pub mod rate_limit;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{PortalError, RetryPolicy, StoreError};
pub use identifiers::{BlobSha, BranchName, ContentPath, RecordId, RepositoryId, WriteJobId};
pub use merge::{resolve, ConflictStrategy, LocalChanges};
pub use ports::{LocalCache, RemoteStore};
pub use rate_limit::RateLimitSnapshot;
pub use types::{
    find, next_id, parse_records, remove, render_records, upsert, CacheTtl, CachedCollection,
    CollectionKind, Record, RemoteSnapshot, Timestamp, UnknownCollection,
};
