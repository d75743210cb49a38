//! Lab content GitHub infrastructure adapter.
//!
//! Implements the [`portal::RemoteStore`] port over the GitHub REST Contents
//! API: each collection is one JSON file in the configured repository,
//! branch and data directory. Writes are SHA-guarded PUTs, so a stale base
//! SHA surfaces as [`portal::StoreError::Conflict`] for the sync layer to
//! resolve.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! All GitHub API details (authentication, media types, base64 payloads,
//! status mapping, rate-limit headers) are handled here; the sync layer
//! never sees them.

mod client;
mod contents;
mod errors;
mod rate_limit;

pub use client::{GithubConfig, GithubContentStore, DEFAULT_API_BASE};
pub use rate_limit::RateLimitTracker;
