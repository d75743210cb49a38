//! Mapping of HTTP failures onto [`portal::StoreError`].

use std::time::Duration;

use portal::{StoreError, Timestamp};

/// Fallback wait when GitHub signals a secondary rate limit without saying how long.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Classifies a non-success response.
///
/// `header` looks up response headers by lower-case name. `path` names the
/// resource in error messages.
pub(crate) fn classify_status<'a>(
    status: u16,
    header: impl Fn(&str) -> Option<&'a str>,
    message: String,
    path: &str,
    now: Timestamp,
) -> StoreError {
    match status {
        401 => StoreError::Unauthorized,
        403 | 429 => {
            let exhausted = header("x-ratelimit-remaining").map(str::trim) == Some("0");
            let retry_after = header("retry-after").and_then(|v| v.trim().parse::<u64>().ok());
            if exhausted {
                let reset_at = header("x-ratelimit-reset")
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .and_then(Timestamp::from_unix)
                    .unwrap_or_else(|| later(now, DEFAULT_RATE_LIMIT_WAIT));
                StoreError::RateLimited { reset_at }
            } else if let Some(secs) = retry_after {
                StoreError::RateLimited {
                    reset_at: later(now, Duration::from_secs(secs)),
                }
            } else if status == 429 {
                StoreError::RateLimited {
                    reset_at: later(now, DEFAULT_RATE_LIMIT_WAIT),
                }
            } else {
                StoreError::Forbidden { message }
            }
        }
        404 => StoreError::NotFound {
            resource: path.to_string(),
        },
        409 => StoreError::Conflict {
            path: path.to_string(),
        },
        // 422 is also how the Contents API reports a stale or missing `sha`.
        422 if message.to_ascii_lowercase().contains("sha") => StoreError::Conflict {
            path: path.to_string(),
        },
        _ => StoreError::Server { status, message },
    }
}

/// Maps a request that produced no usable response.
pub(crate) fn transport_error(error: &reqwest::Error) -> StoreError {
    StoreError::Transport {
        message: error.to_string(),
    }
}

fn later(now: Timestamp, by: Duration) -> Timestamp {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| now.as_datetime().checked_add_signed(d))
        .map_or(now, Timestamp::from_utc)
}
