// =============================================================================
// Rate-Limit Tracker — watches Bybit's per-endpoint request budget
// =============================================================================
//
// Bybit reports the remaining budget of the current window on every response:
//   X-Bapi-Limit                  requests allowed in the window
//   X-Bapi-Limit-Status           requests left in the window
//   X-Bapi-Limit-Reset-Timestamp  window reset time (ms)
//
// Public market endpoints do not always send them; absent headers leave the
// counters untouched. Counters are atomics so any task may read them.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Warn once the remaining budget drops to this share of the limit.
const REMAINING_WARN_RATIO: f64 = 0.2;

const HDR_LIMIT: &str = "X-Bapi-Limit";
const HDR_REMAINING: &str = "X-Bapi-Limit-Status";
const HDR_RESET: &str = "X-Bapi-Limit-Reset-Timestamp";

pub struct RateLimitTracker {
    limit: AtomicU32,
    remaining: AtomicU32,
    reset_at_ms: AtomicI64,
    responses_seen: AtomicU32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: i64,
    pub responses_seen: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            limit: AtomicU32::new(0),
            remaining: AtomicU32::new(0),
            reset_at_ms: AtomicI64::new(0),
            responses_seen: AtomicU32::new(0),
        }
    }

    /// Refresh the counters from a response's headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        self.responses_seen.fetch_add(1, Ordering::Relaxed);

        if let Some(limit) = header_num::<u32>(headers, HDR_LIMIT) {
            self.limit.store(limit, Ordering::Relaxed);
        }
        if let Some(reset) = header_num::<i64>(headers, HDR_RESET) {
            self.reset_at_ms.store(reset, Ordering::Relaxed);
        }
        if let Some(remaining) = header_num::<u32>(headers, HDR_REMAINING) {
            self.remaining.store(remaining, Ordering::Relaxed);
            let limit = self.limit.load(Ordering::Relaxed);
            if self.is_running_low() {
                warn!(
                    remaining,
                    limit,
                    reset_at_ms = self.reset_at_ms.load(Ordering::Relaxed),
                    "rate-limit budget running low"
                );
            }
            debug!(remaining, limit, "rate-limit budget updated from header");
        }
    }

    /// True once the exchange reported a budget and less than a fifth of it
    /// remains.
    pub fn is_running_low(&self) -> bool {
        let limit = self.limit.load(Ordering::Relaxed);
        if limit == 0 {
            return false;
        }
        let remaining = self.remaining.load(Ordering::Relaxed);
        f64::from(remaining) <= f64::from(limit) * REMAINING_WARN_RATIO
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            limit: self.limit.load(Ordering::Relaxed),
            remaining: self.remaining.load(Ordering::Relaxed),
            reset_at_ms: self.reset_at_ms.load(Ordering::Relaxed),
            responses_seen: self.responses_seen.load(Ordering::Relaxed),
        }
    }
}

fn header_num<T: std::str::FromStr>(headers: &reqwest::header::HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("limit", &self.limit.load(Ordering::Relaxed))
            .field("remaining", &self.remaining.load(Ordering::Relaxed))
            .field("reset_at_ms", &self.reset_at_ms.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn headers(limit: &str, remaining: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(HDR_LIMIT, HeaderValue::from_str(limit).unwrap());
        h.insert(HDR_REMAINING, HeaderValue::from_str(remaining).unwrap());
        h.insert(HDR_RESET, HeaderValue::from_static("1700000001000"));
        h
    }

    #[test]
    fn headers_update_snapshot() {
        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers("120", "119"));
        let snap = tracker.snapshot();
        assert_eq!(snap.limit, 120);
        assert_eq!(snap.remaining, 119);
        assert_eq!(snap.reset_at_ms, 1_700_000_001_000);
        assert_eq!(snap.responses_seen, 1);
        assert!(!tracker.is_running_low());
    }

    #[test]
    fn low_budget_is_flagged() {
        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers("100", "10"));
        assert!(tracker.is_running_low());
    }

    #[test]
    fn missing_headers_leave_counters_alone() {
        let tracker = RateLimitTracker::new();
        tracker.update_from_headers(&headers("100", "50"));
        tracker.update_from_headers(&HeaderMap::new());
        let snap = tracker.snapshot();
        assert_eq!(snap.remaining, 50);
        assert_eq!(snap.responses_seen, 2);
    }

    #[test]
    fn unknown_budget_is_never_low() {
        let tracker = RateLimitTracker::new();
        assert!(!tracker.is_running_low());
    }
}
