//! Error and retry-policy types for the lab content domain.
//!
//! [`StoreError`] is what the ports ([`crate::RemoteStore`],
//! [`crate::LocalCache`]) report; infrastructure crates map their transport
//! failures onto it. [`PortalError`] is what the sync layer hands to callers.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CollectionKind, RecordId, Timestamp};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: network failures, 5xx responses, rate limits.
/// - `NonRetryable` errors: bad credentials, missing permissions, malformed
///   content, unresolved conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` or `x-ratelimit-reset` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried without human intervention.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Port-level errors
// ---------------------------------------------------------------------------

/// Failures reported by a remote store or a local cache.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum StoreError {
    /// The requested resource does not exist (or the token cannot see it).
    #[error("Not found: {resource}")]
    NotFound {
        /// What was requested.
        resource: String,
    },

    /// The token is missing, expired or revoked.
    #[error("Unauthorized: the access token was rejected")]
    Unauthorized,

    /// The token is valid but lacks permission for the operation.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Message returned by the server.
        message: String,
    },

    /// The SHA-guarded write lost the race: the file changed since it was read.
    #[error("Conflict writing {path}: the remote file changed since it was read")]
    Conflict {
        /// Repository path of the file.
        path: String,
    },

    /// The API rate limit is exhausted until `reset_at`.
    #[error("Rate limited until {reset_at}")]
    RateLimited {
        /// When the limit window resets.
        reset_at: Timestamp,
    },

    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The server answered with an unexpected status.
    #[error("Server returned {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message returned by the server.
        message: String,
    },

    /// A body could not be decoded into records.
    #[error("Invalid content in {path}: {message}")]
    InvalidContent {
        /// Where the content came from.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// A local file operation failed.
    #[error("I/O error on {path}: {message}")]
    Io {
        /// The file involved.
        path: String,
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Classifies the error for retry decisions.
    ///
    /// `now` is used to turn a rate-limit reset time into a delay.
    pub fn retry_policy(&self, now: Timestamp) -> RetryPolicy {
        match self {
            StoreError::Transport { .. } => RetryPolicy::Retryable { after: None },
            StoreError::Server { status, .. } if *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            StoreError::RateLimited { reset_at } => RetryPolicy::Retryable {
                after: Some(reset_at.duration_since(now)),
            },
            _ => RetryPolicy::NonRetryable,
        }
    }

    /// Returns `true` for [`StoreError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

// ---------------------------------------------------------------------------
// Sync-layer errors
// ---------------------------------------------------------------------------

/// Errors surfaced to callers of the sync layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortalError {
    /// The remote store or local cache failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Conflict retries were exhausted without a successful write.
    ///
    /// The working copy keeps the merged edits and stays dirty.
    #[error("Could not resolve write conflict on {kind} after {attempts} attempts")]
    ConflictUnresolved {
        /// The collection being written.
        kind: CollectionKind,
        /// Number of PUT attempts made.
        attempts: u32,
    },

    /// An edit referenced a record that does not exist.
    #[error("No record with id {id} in {kind}")]
    RecordNotFound {
        /// The collection searched.
        kind: CollectionKind,
        /// The missing id.
        id: RecordId,
    },

    /// Input could not be turned into a record.
    #[error("Invalid record: {message}")]
    InvalidRecord {
        /// What was wrong with it.
        message: String,
    },

    /// A write was attempted without an access token.
    #[error("An access token is required for this operation")]
    MissingToken,

    /// The write queue has shut down.
    #[error("The write queue is closed")]
    QueueClosed,

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl PortalError {
    /// Classifies the error for retry decisions.
    pub fn retry_policy(&self, now: Timestamp) -> RetryPolicy {
        match self {
            PortalError::Store(e) => e.retry_policy(now),
            _ => RetryPolicy::NonRetryable,
        }
    }
}
