// =============================================================================
// Incremental Poller — keeps the series current
// =============================================================================
//
// State machine:
//   Idle ──tick──▶ Fetching ──cycle done (ok / nothing new / failed)──▶ Idle
//
// Each tick fetches [high_water_mark, now) with one attempt per page. The
// exchange answers a window with its newest `limit` candles, so a span wider
// than one page is walked oldest-first in page-sized windows. With no mark
// yet the tick runs the historical backfill instead (cold start). A failed
// fetch is logged and left for the next tick; the loop itself never stops on
// an error.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::market_data::{FetchWindow, KlineSource, Normalizer, SeriesStore};
use crate::sync::backfill::{Backfill, Backfiller};
use crate::sync::retry::RetryPolicy;
use crate::types::{Ingest, PollerState, SeriesUpdate};

/// Capacity of the update channel; slow consumers just miss old updates.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// What one cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No mark yet, so the backfill ran and seeded the store.
    ColdStart { loaded: usize },
    Merged { added: usize },
    NothingNew,
    /// The fetch failed; retried on the next tick. Pages merged before the
    /// failure stay merged.
    Deferred(FeedError),
}

pub struct Poller {
    source: Arc<dyn KlineSource>,
    backfiller: Backfiller,
    normalizer: Normalizer,
    store: Arc<SeriesStore>,
    retry: RetryPolicy,
    limit: u32,
    interval_ms: i64,
    request_delay: Duration,
    period: Duration,
    updates: broadcast::Sender<SeriesUpdate>,
    state: PollerState,
}

impl Poller {
    pub fn new(
        source: Arc<dyn KlineSource>,
        store: Arc<SeriesStore>,
        normalizer: Normalizer,
        config: &FeedConfig,
    ) -> Self {
        let backfiller = Backfiller::new(source.clone(), config);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            source,
            backfiller,
            normalizer,
            store,
            retry: RetryPolicy::incremental(),
            limit: config.request_limit(),
            interval_ms: i64::from(config.interval_minutes) * 60_000,
            request_delay: config.request_delay(),
            period: config.poll_period(),
            updates,
            state: PollerState::Idle,
        }
    }

    #[cfg(test)]
    pub fn with_backfiller(mut self, backfiller: Backfiller) -> Self {
        self.backfiller = backfiller;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeriesUpdate> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Cold start
    // -------------------------------------------------------------------------

    /// Backfill, normalize and seed the store.
    ///
    /// Fails with `EmptyInput` when the backfill produced no usable candle,
    /// either because nothing was fetched or because no fetched row had a
    /// readable timestamp. A partial backfill is accepted (see
    /// [`Backfill::incomplete`]).
    pub async fn cold_start(&self, now_ms: i64) -> Result<Backfill, FeedError> {
        let backfill = self.backfiller.run(now_ms).await;
        if let Some(warning) = backfill.incomplete() {
            warn!(error = %warning, "continuing with a partial history");
        }

        let fragment = self.normalizer.normalize(&backfill.rows, Ingest::Backfill)?;
        if fragment.is_empty() {
            warn!(rows = backfill.rows.len(), "no backfilled row survived normalization");
            return Err(FeedError::EmptyInput);
        }
        self.store.initialize(fragment);

        let snapshot = self.store.snapshot();
        let gaps = snapshot.gaps(self.interval_ms);
        if !gaps.is_empty() {
            warn!(
                gaps = gaps.len(),
                missing = snapshot.missing_candles(self.interval_ms),
                "history has gaps"
            );
        }

        if let Some(mark) = self.store.high_water_mark() {
            self.publish(snapshot.len(), snapshot.len(), mark);
        }
        info!(
            len = snapshot.len(),
            high_water_mark = ?self.store.high_water_mark(),
            "series seeded from backfill"
        );
        Ok(backfill)
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    /// Run one Idle → Fetching → Idle cycle at `now_ms`.
    pub async fn poll_once(&mut self, now_ms: i64) -> CycleOutcome {
        self.state = PollerState::Fetching;
        let outcome = self.cycle(now_ms).await;
        self.state = PollerState::Idle;

        match &outcome {
            CycleOutcome::ColdStart { loaded } => info!(loaded, "cold start complete"),
            CycleOutcome::Merged { added } => debug!(added, "cycle merged new candles"),
            CycleOutcome::NothingNew => debug!("cycle found nothing new"),
            CycleOutcome::Deferred(e) => warn!(error = %e, "cycle deferred"),
        }
        outcome
    }

    async fn cycle(&self, now_ms: i64) -> CycleOutcome {
        let Some(mark) = self.store.high_water_mark() else {
            return match self.cold_start(now_ms).await {
                Ok(_) => CycleOutcome::ColdStart {
                    loaded: self.store.len(),
                },
                Err(e) => CycleOutcome::Deferred(e),
            };
        };

        if FetchWindow::new(mark, now_ms).is_none() {
            debug!(mark, now_ms, "clock has not passed the high-water mark");
            return CycleOutcome::NothingNew;
        }

        let page_width = i64::from(self.limit) * self.interval_ms;
        let mut start = mark;
        let mut added = 0usize;
        let mut pages = 0usize;

        while let Some(window) = FetchWindow::new(start, (start + page_width).min(now_ms)) {
            if pages > 0 {
                tokio::time::sleep(self.request_delay).await;
            }
            pages += 1;

            match self.fetch_page(window).await {
                Ok(n) => added += n,
                Err(e) => {
                    if added > 0 {
                        self.publish_current(added, mark);
                    }
                    return CycleOutcome::Deferred(e);
                }
            }
            start = window.end_ms();
        }

        if pages > 1 {
            info!(pages, added, "caught up across several pages");
        }
        if added == 0 {
            return CycleOutcome::NothingNew;
        }

        self.publish_current(added, mark);
        CycleOutcome::Merged { added }
    }

    /// Fetch, normalize and merge one window; returns the candles added.
    async fn fetch_page(&self, window: FetchWindow) -> Result<usize, FeedError> {
        let source = &self.source;
        let limit = self.limit;
        let rows = self
            .retry
            .run("incremental fetch", |_| async move { source.fetch(window, limit).await })
            .await?;

        let fragment = self.normalizer.normalize(&rows, Ingest::Incremental)?;
        Ok(self.store.merge(fragment))
    }

    fn publish_current(&self, added: usize, previous_mark: i64) {
        let len = self.store.len();
        let mark = self.store.high_water_mark().unwrap_or(previous_mark);
        self.publish(added, len, mark);
    }

    fn publish(&self, added: usize, len: usize, high_water_mark: i64) {
        let update = SeriesUpdate {
            added,
            high_water_mark,
            len,
        };
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Tick forever. Missed ticks are skipped rather than bunched up.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(period_secs = self.period.as_secs(), "poller started");

        loop {
            interval.tick().await;
            debug!(state = %self.state(), "tick");
            let _ = self.poll_once(now_ms()).await;
        }
    }
}

/// Wall clock in whole seconds, expressed in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp() * 1000
}

// =============================================================================
// Tests
// =============================================================================
