//! Client-side rate-limit tracking.

use std::sync::Mutex;

use portal::{RateLimitSnapshot, StoreError, Timestamp};
use tracing::{debug, warn};

/// Remembers the rate-limit state of the last response and refuses to send
/// requests while the window is exhausted.
///
/// Refusing locally keeps an exhausted token from burning further requests
/// (GitHub counts rejected calls against secondary limits).
#[derive(Debug)]
pub struct RateLimitTracker {
    latest: Mutex<Option<RateLimitSnapshot>>,
    low_water: u32,
}

impl RateLimitTracker {
    /// Creates a tracker that warns once `remaining` drops to `low_water` or below.
    pub fn new(low_water: u32) -> Self {
        Self {
            latest: Mutex::new(None),
            low_water,
        }
    }

    /// The most recently observed state.
    pub fn current(&self) -> Option<RateLimitSnapshot> {
        self.lock().clone()
    }

    /// Records the state reported by a response.
    pub fn observe(&self, snapshot: RateLimitSnapshot) {
        if snapshot.is_low(self.low_water) {
            warn!(
                remaining = snapshot.remaining,
                limit = snapshot.limit,
                reset_at = %snapshot.reset_at,
                resource = %snapshot.resource,
                "GitHub rate limit running low"
            );
        } else {
            debug!(remaining = snapshot.remaining, limit = snapshot.limit, "rate limit observed");
        }
        *self.lock() = Some(snapshot);
    }

    /// Fails with [`StoreError::RateLimited`] if the last known window is exhausted.
    pub fn check(&self, now: Timestamp) -> Result<(), StoreError> {
        match &*self.lock() {
            Some(snapshot) if snapshot.is_exhausted(now) => Err(StoreError::RateLimited {
                reset_at: snapshot.reset_at,
            }),
            _ => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<RateLimitSnapshot>> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
