// =============================================================================
// Historical Backfill — paginated load of the lookback window
// =============================================================================
//
// [now - H, now) is cut into contiguous windows of `capacity` candles each
// (the last one clipped to `now`). Windows are fetched oldest-first with a
// bounded retry per window and a fixed courtesy delay between requests.
//
// A window that keeps failing is abandoned and the load goes on; the result
// then reports `BackfillIncomplete`. An empty page ends that window early.
// If the pages together overshoot the expected candle count, the FIRST
// `expected` rows in fetch order are kept.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::market_data::{FetchWindow, KlineSource, RawKline};
use crate::sync::retry::RetryPolicy;

const MS_PER_MINUTE: i64 = 60_000;

// =============================================================================
// Window planning
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillPlan {
    pub history_hours: u32,
    pub interval_minutes: u32,
    pub candles_per_request: u32,
}

impl BackfillPlan {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            history_hours: config.history_hours,
            interval_minutes: config.interval_minutes.max(1),
            candles_per_request: config.request_limit().max(1),
        }
    }

    pub fn total_minutes(&self) -> i64 {
        i64::from(self.history_hours) * 60
    }

    /// Candles that cover the lookback; equals `total_minutes` for 1m candles.
    pub fn expected_candles(&self) -> usize {
        let interval = i64::from(self.interval_minutes);
        ((self.total_minutes() + interval - 1) / interval) as usize
    }

    pub fn num_requests(&self) -> usize {
        let cap = self.candles_per_request as usize;
        (self.expected_candles() + cap - 1) / cap
    }

    fn window_width_ms(&self) -> i64 {
        i64::from(self.candles_per_request) * i64::from(self.interval_minutes) * MS_PER_MINUTE
    }

    /// Contiguous windows covering `[now_ms - H, now_ms)`.
    pub fn windows(&self, now_ms: i64) -> Vec<FetchWindow> {
        let width = self.window_width_ms();
        let mut start = now_ms - self.total_minutes() * MS_PER_MINUTE;
        let mut out = Vec::with_capacity(self.num_requests());

        for _ in 0..self.num_requests() {
            let end = (start + width).min(now_ms);
            match FetchWindow::new(start, end) {
                Some(window) => out.push(window),
                None => break,
            }
            start = end;
            if start >= now_ms {
                break;
            }
        }
        out
    }
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Clone)]
pub struct Backfill {
    /// Raw rows in fetch order, trimmed to `expected`.
    pub rows: Vec<RawKline>,
    pub expected: usize,
    pub windows: usize,
    /// Windows abandoned after their retries ran out.
    pub skipped: Vec<FetchWindow>,
    /// Rows dropped by the overshoot trim.
    pub trimmed: usize,
}

impl Backfill {
    /// `BackfillIncomplete` when any window was skipped.
    pub fn incomplete(&self) -> Option<FeedError> {
        (!self.skipped.is_empty()).then(|| FeedError::BackfillIncomplete {
            skipped: self.skipped.len(),
            total: self.windows,
        })
    }
}

// =============================================================================
// Backfiller
// =============================================================================

pub struct Backfiller {
    source: Arc<dyn KlineSource>,
    plan: BackfillPlan,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl Backfiller {
    pub fn new(source: Arc<dyn KlineSource>, config: &FeedConfig) -> Self {
        Self {
            source,
            plan: BackfillPlan::from_config(config),
            retry: RetryPolicy::backfill(config),
            request_delay: config.request_delay(),
        }
    }

    #[cfg(test)]
    pub fn with_parts(
        source: Arc<dyn KlineSource>,
        plan: BackfillPlan,
        retry: RetryPolicy,
        request_delay: Duration,
    ) -> Self {
        Self {
            source,
            plan,
            retry,
            request_delay,
        }
    }

    /// Load the lookback window ending at `now_ms`.
    pub async fn run(&self, now_ms: i64) -> Backfill {
        let windows = self.plan.windows(now_ms);
        let expected = self.plan.expected_candles();
        let limit = self.plan.candles_per_request;

        info!(
            hours = self.plan.history_hours,
            expected,
            requests = windows.len(),
            "starting historical backfill"
        );

        let mut rows: Vec<RawKline> = Vec::with_capacity(expected);
        let mut skipped = Vec::new();

        for (i, window) in windows.iter().copied().enumerate() {
            let label = format!("backfill window {}/{} {window}", i + 1, windows.len());
            let source = &self.source;

            match self
                .retry
                .run(&label, |_| async move { source.fetch(window, limit).await })
                .await
            {
                Ok(page) if page.is_empty() => {
                    debug!(%window, "empty page, moving to next window");
                }
                Ok(page) => {
                    rows.extend(page);
                    let progress = (rows.len() * 100 / expected.max(1)).min(100);
                    info!(
                        request = i + 1,
                        of = windows.len(),
                        loaded = rows.len(),
                        expected,
                        progress_pct = progress,
                        "backfill progress"
                    );
                }
                Err(e) => {
                    warn!(%window, error = %e, "backfill window skipped");
                    skipped.push(window);
                }
            }

            if i + 1 < windows.len() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        let trimmed = rows.len().saturating_sub(expected);
        rows.truncate(expected);

        info!(
            loaded = rows.len(),
            expected,
            trimmed,
            skipped = skipped.len(),
            "backfill finished"
        );

        Backfill {
            rows,
            expected,
            windows: windows.len(),
            skipped,
            trimmed,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::retry::OnExhausted;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const NOW: i64 = 1_700_006_400_000;

    fn plan(hours: u32) -> BackfillPlan {
        BackfillPlan {
            history_hours: hours,
            interval_minutes: 1,
            candles_per_request: 200,
        }
    }

    fn raw(ts: i64) -> RawKline {
        RawKline::from_fields([
            ts.to_string(),
            "1".into(),
            "2".into(),
            "0.5".into(),
            "1.5".into(),
            "10".into(),
            "15".into(),
        ])
    }

    /// Serves one candle per minute of the window; windows listed in
    /// `failing` always fail; `empty` windows return nothing.
    #[derive(Default)]
    struct ScriptedSource {
        failing: Vec<usize>,
        empty: Vec<usize>,
        extra_per_window: usize,
        calls: Mutex<Vec<FetchWindow>>,
        order: Mutex<HashMap<i64, usize>>,
    }

    impl ScriptedSource {
        fn index_of(&self, window: FetchWindow) -> usize {
            let mut order = self.order.lock();
            let next = order.len();
            *order.entry(window.start_ms()).or_insert(next)
        }

        fn attempts_for(&self, window: FetchWindow) -> usize {
            self.calls.lock().iter().filter(|w| **w == window).count()
        }
    }

    #[async_trait]
    impl KlineSource for ScriptedSource {
        async fn fetch(&self, window: FetchWindow, _limit: u32) -> Result<Vec<RawKline>, FeedError> {
            self.calls.lock().push(window);
            let idx = self.index_of(window);
            if self.failing.contains(&idx) {
                return Err(FeedError::transient("connection reset"));
            }
            if self.empty.contains(&idx) {
                return Ok(Vec::new());
            }
            let mut page: Vec<RawKline> = (window.start_ms()..window.end_ms())
                .step_by(MS_PER_MINUTE as usize)
                .map(raw)
                .collect();
            page.extend((0..self.extra_per_window).map(|k| raw(window.end_ms() + k as i64)));
            Ok(page)
        }
    }

    fn backfiller(source: Arc<ScriptedSource>, hours: u32) -> Backfiller {
        Backfiller::with_parts(
            source,
            plan(hours),
            RetryPolicy {
                max_attempts: 3,
                pause: Duration::ZERO,
                on_exhausted: OnExhausted::SkipWindow,
            },
            Duration::ZERO,
        )
    }

    fn paced_backfiller(source: Arc<ScriptedSource>, retry_pause: Duration, delay: Duration) -> Backfiller {
        Backfiller::with_parts(
            source,
            plan(24),
            RetryPolicy {
                max_attempts: 3,
                pause: retry_pause,
                on_exhausted: OnExhausted::SkipWindow,
            },
            delay,
        )
    }

    #[test]
    fn one_day_needs_eight_contiguous_windows() {
        let p = plan(24);
        assert_eq!(p.total_minutes(), 1440);
        assert_eq!(p.num_requests(), 8);

        let windows = p.windows(NOW);
        assert_eq!(windows.len(), 8);
        assert_eq!(windows[0].start_ms(), NOW - 24 * 3_600_000);
        assert_eq!(windows[7].end_ms(), NOW);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_ms(), pair[1].start_ms());
        }
        for w in &windows[..7] {
            assert_eq!(w.width_ms(), 200 * MS_PER_MINUTE);
        }
        assert!(windows[7].width_ms() <= 200 * MS_PER_MINUTE);
        assert_eq!(windows[7].width_ms(), 40 * MS_PER_MINUTE);
    }

    #[test]
    fn exact_multiple_has_no_stub_window() {
        // 10h = 600 minutes = 3 full windows.
        let windows = plan(10).windows(NOW);
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.width_ms() == 200 * MS_PER_MINUTE));
    }

    #[test]
    fn coarser_interval_widens_windows() {
        let p = BackfillPlan {
            history_hours: 24,
            interval_minutes: 5,
            candles_per_request: 200,
        };
        assert_eq!(p.expected_candles(), 288);
        let windows = p.windows(NOW);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].width_ms(), 1000 * MS_PER_MINUTE);
        assert_eq!(windows[1].end_ms(), NOW);
    }

    #[tokio::test]
    async fn full_backfill_collects_every_window() {
        let source = Arc::new(ScriptedSource::default());
        let result = backfiller(source.clone(), 24).run(NOW).await;

        assert!(result.incomplete().is_none());
        assert_eq!(result.windows, 8);
        assert_eq!(result.rows.len(), 1440);
        assert_eq!(source.calls.lock().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn request_delay_separates_windows_but_not_the_last() {
        let source = Arc::new(ScriptedSource::default());
        let started = tokio::time::Instant::now();
        let result = paced_backfiller(source, Duration::from_secs(2), Duration::from_secs(1))
            .run(NOW)
            .await;

        assert_eq!(result.rows.len(), 1440);
        assert_eq!(started.elapsed(), 7 * Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_pause_applies_between_attempts_of_a_failing_window() {
        let source = Arc::new(ScriptedSource {
            failing: vec![2],
            ..ScriptedSource::default()
        });
        let started = tokio::time::Instant::now();
        let result = paced_backfiller(source.clone(), Duration::from_secs(2), Duration::from_secs(1))
            .run(NOW)
            .await;

        assert_eq!(result.skipped.len(), 1);
        assert_eq!(source.attempts_for(plan(24).windows(NOW)[2]), 3);
        assert_eq!(
            started.elapsed(),
            7 * Duration::from_secs(1) + 2 * Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn failing_window_is_tried_max_times_then_skipped() {
        let source = Arc::new(ScriptedSource {
            failing: vec![2],
            ..ScriptedSource::default()
        });
        let result = backfiller(source.clone(), 24).run(NOW).await;

        let windows = plan(24).windows(NOW);
        assert_eq!(source.attempts_for(windows[2]), 3);
        assert_eq!(source.attempts_for(windows[3]), 1);
        assert_eq!(result.skipped, vec![windows[2]]);
        assert_eq!(result.rows.len(), 1440 - 200);
        assert!(matches!(
            result.incomplete(),
            Some(FeedError::BackfillIncomplete { skipped: 1, total: 8 })
        ));
    }

    #[tokio::test]
    async fn empty_page_moves_on_without_retry() {
        let source = Arc::new(ScriptedSource {
            empty: vec![0],
            ..ScriptedSource::default()
        });
        let result = backfiller(source.clone(), 24).run(NOW).await;

        let windows = plan(24).windows(NOW);
        assert_eq!(source.attempts_for(windows[0]), 1);
        assert!(result.incomplete().is_none());
        assert_eq!(result.rows.len(), 1440 - 200);
    }

    #[tokio::test]
    async fn overshoot_keeps_the_first_rows() {
        let source = Arc::new(ScriptedSource {
            extra_per_window: 1,
            ..ScriptedSource::default()
        });
        let result = backfiller(source, 24).run(NOW).await;

        assert_eq!(result.rows.len(), 1440);
        assert_eq!(result.trimmed, 8);
        let first_start = NOW - 24 * 3_600_000;
        assert_eq!(result.rows[0].timestamp, first_start.to_string());
        // The very last row of the last page is the one that falls off.
        assert_ne!(result.rows.last().unwrap().timestamp, NOW.to_string());
    }

    #[tokio::test]
    async fn every_window_failing_yields_no_rows() {
        let source = Arc::new(ScriptedSource {
            failing: (0..8).collect(),
            ..ScriptedSource::default()
        });
        let result = backfiller(source.clone(), 24).run(NOW).await;
        assert!(result.rows.is_empty());
        assert_eq!(result.skipped.len(), 8);
        assert_eq!(source.calls.lock().len(), 24);
    }
}
