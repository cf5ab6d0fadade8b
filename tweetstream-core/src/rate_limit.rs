//! Rate-limit metadata carried on responses (`x-rate-limit-*` headers).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::headers::Headers;

pub const LIMIT_HEADER: &str = "x-rate-limit-limit";
pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RESET_HEADER: &str = "x-rate-limit-reset";

/// Values from one response. Refreshed together; a newer snapshot replaces an older one wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Unix seconds at which the window resets.
    pub reset_at: Option<u64>,
}

impl RateLimit {
    /// Parse from response headers; `None` when no rate-limit header is present.
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        let rl = Self {
            limit: headers.parse(LIMIT_HEADER),
            remaining: headers.parse(REMAINING_HEADER),
            reset_at: headers.parse(RESET_HEADER),
        };
        if rl.limit.is_none() && rl.remaining.is_none() && rl.reset_at.is_none() {
            return None;
        }
        Some(rl)
    }

    /// Time left until reset relative to `now` (unix seconds), saturating at zero.
    pub fn retry_after_at(&self, now: u64) -> Option<Duration> {
        self.reset_at
            .map(|reset| Duration::from_secs(reset.saturating_sub(now)))
    }

    /// Time left until reset relative to the system clock.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_at(unix_now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
