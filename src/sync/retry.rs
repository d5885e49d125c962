// =============================================================================
// Retry policy — bounded attempts with a fixed pause
// =============================================================================
//
// Shared by both fetch paths. The backfill runs with several attempts and
// skips the window when they run out; the incremental poller runs a single
// attempt and leaves the gap for the next tick. What differs is the attempt
// count and `OnExhausted`, not the loop.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::FeedConfig;
use crate::error::FeedError;

/// What the caller does once every attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExhausted {
    /// Abandon this unit of work and move on to the next one.
    SkipWindow,
    /// Give up for now; the next scheduled cycle covers it.
    DeferToNextTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub pause: Duration,
    pub on_exhausted: OnExhausted,
}

impl RetryPolicy {
    /// Backfill: `max_retries` attempts, `retry_pause` apart, then skip.
    pub fn backfill(config: &FeedConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            pause: config.retry_pause(),
            on_exhausted: OnExhausted::SkipWindow,
        }
    }

    /// Incremental: one attempt, then wait for the next tick.
    pub fn incremental() -> Self {
        Self {
            max_attempts: 1,
            pause: Duration::ZERO,
            on_exhausted: OnExhausted::DeferToNextTick,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FeedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        what,
                        attempt,
                        max_attempts,
                        pause_ms = self.pause.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.pause).await;
                    attempt += 1;
                }
                Err(e) => {
                    match self.on_exhausted {
                        OnExhausted::SkipWindow => {
                            warn!(what, attempts = attempt, error = %e, "attempts exhausted, skipping");
                        }
                        OnExhausted::DeferToNextTick => {
                            warn!(what, attempts = attempt, error = %e, "fetch failed, deferring to next tick");
                        }
                    }
                    return Err(e);
                }
            }
        }
    }
}
