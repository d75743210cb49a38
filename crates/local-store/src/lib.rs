//! Local persistence for the lab content store.
//!
//! Implements the [`portal::LocalCache`] port twice:
//!
//! - [`FileCache`]: one JSON file per collection in a cache directory,
//!   written atomically. Survives restarts; this is the persisted cache the
//!   read path falls back to when the remote is slow or unreachable.
//! - [`MemoryCache`]: process-local, used by tests and `--no-cache` runs.
//!
//! It also owns [`TokenStore`], the file holding the personal access token
//! used for admin writes.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File layout, atomic replacement and permission bits
//! live here. The sync layer sees only [`portal::LocalCache`].

mod atomic;
mod file_cache;
mod memory_cache;
mod token;

pub use file_cache::FileCache;
pub use memory_cache::MemoryCache;
pub use token::{TokenError, TokenStore};
