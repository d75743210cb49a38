//! GitHub API rate-limit state.
//!
//! Every REST response carries `x-ratelimit-*` headers. A [`RateLimitSnapshot`]
//! is the parsed form of one response's headers; the adapter keeps the latest
//! one and consults it before sending the next request.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Rate-limit state reported by the most recent API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Requests spent in the current window.
    pub used: u32,
    /// When the window resets.
    pub reset_at: Timestamp,
    /// Which limit bucket the headers describe (`core`, `search`, ...).
    pub resource: String,
}

impl RateLimitSnapshot {
    /// Builds a snapshot from header values, looked up by name through `header`.
    ///
    /// Returns `None` unless `limit`, `remaining` and `reset` are all present
    /// and numeric. `used` defaults to `limit - remaining`, `resource` to `core`.
    pub fn from_headers<'a>(header: impl Fn(&str) -> Option<&'a str>) -> Option<Self> {
        let number = |name: &str| header(name).and_then(|v| v.trim().parse::<u64>().ok());

        let limit = u32::try_from(number("x-ratelimit-limit")?).ok()?;
        let remaining = u32::try_from(number("x-ratelimit-remaining")?).ok()?;
        let reset = i64::try_from(number("x-ratelimit-reset")?).ok()?;
        let used = number("x-ratelimit-used")
            .and_then(|u| u32::try_from(u).ok())
            .unwrap_or_else(|| limit.saturating_sub(remaining));
        let resource = header("x-ratelimit-resource")
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "core".to_string());

        Some(Self {
            limit,
            remaining,
            used,
            reset_at: Timestamp::from_unix(reset)?,
            resource,
        })
    }

    /// Returns `true` if no requests remain and the window has not reset yet.
    pub fn is_exhausted(&self, now: Timestamp) -> bool {
        self.remaining == 0 && self.reset_at > now
    }

    /// Returns `true` if `remaining` is at or below `threshold`.
    pub fn is_low(&self, threshold: u32) -> bool {
        self.remaining <= threshold
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> Option<RateLimitSnapshot> {
        let headers: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RateLimitSnapshot::from_headers(|name| headers.get(name).map(String::as_str))
    }

    #[test]
    fn parses_full_header_set() {
        let snap = snapshot(&[
            ("x-ratelimit-limit", "5000"),
            ("x-ratelimit-remaining", "4990"),
            ("x-ratelimit-used", "10"),
            ("x-ratelimit-reset", "1700000000"),
            ("x-ratelimit-resource", "core"),
        ])
        .unwrap();
        assert_eq!(snap.limit, 5000);
        assert_eq!(snap.remaining, 4990);
        assert_eq!(snap.used, 10);
        assert_eq!(snap.reset_at, Timestamp::from_unix(1_700_000_000).unwrap());
        assert_eq!(snap.resource, "core");
    }

    #[test]
    fn derives_used_and_resource_when_absent() {
        let snap = snapshot(&[
            ("x-ratelimit-limit", "60"),
            ("x-ratelimit-remaining", "45"),
            ("x-ratelimit-reset", "1700000000"),
        ])
        .unwrap();
        assert_eq!(snap.used, 15);
        assert_eq!(snap.resource, "core");
    }

    #[test]
    fn missing_or_garbled_headers_yield_none() {
        assert!(snapshot(&[]).is_none());
        assert!(snapshot(&[
            ("x-ratelimit-limit", "60"),
            ("x-ratelimit-remaining", "many"),
            ("x-ratelimit-reset", "1700000000"),
        ])
        .is_none());
    }

    #[test]
    fn exhaustion_depends_on_reset_time() {
        let now = Timestamp::from_unix(1_700_000_000).unwrap();
        let mut snap = snapshot(&[
            ("x-ratelimit-limit", "60"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1700000100"),
        ])
        .unwrap();
        assert!(snap.is_exhausted(now));
        snap.reset_at = Timestamp::from_unix(1_699_999_999).unwrap();
        assert!(!snap.is_exhausted(now));
        assert!(snap.is_low(0));
    }
}
