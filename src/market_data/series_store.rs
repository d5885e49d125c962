use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::market_data::candle::{CandleRecord, Series};

// ---------------------------------------------------------------------------
// SeriesStore -- the one owner of the candle series
// ---------------------------------------------------------------------------

/// Thread-safe holder of the ordered candle series and its high-water mark.
///
/// Every mutation takes the write lock for its whole duration, so readers only
/// ever observe a series that is strictly increasing by epoch.
pub struct SeriesStore {
    inner: RwLock<SeriesInner>,
}

#[derive(Default)]
struct SeriesInner {
    records: Vec<CandleRecord>,
    high_water_mark: Option<i64>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SeriesInner::default()),
        }
    }

    /// Replace the contents with `fragment`.
    ///
    /// Records sharing an epoch collapse to the last one supplied. The
    /// high-water mark becomes the newest epoch, or stays unset when the
    /// fragment is empty.
    pub fn initialize(&self, fragment: Vec<CandleRecord>) {
        let records: Vec<CandleRecord> = dedup_last_wins(fragment).into_values().collect();
        let high_water_mark = records.last().map(|c| c.epoch_ms);

        let mut inner = self.inner.write();
        inner.records = records;
        inner.high_water_mark = high_water_mark;

        debug!(len = inner.records.len(), ?high_water_mark, "series initialized");
    }

    /// Fold `fragment` into the series and return how many candles were added.
    ///
    /// * Candles newer than the high-water mark (or all, if unset) are added.
    /// * A candle sitting exactly at the mark replaces the stored one; the
    ///   exchange may have refined a still-forming candle. This is not counted.
    /// * Anything older is ignored.
    ///
    /// Within `fragment`, the last record for an epoch wins.
    pub fn merge(&self, fragment: Vec<CandleRecord>) -> usize {
        if fragment.is_empty() {
            return 0;
        }
        let incoming = dedup_last_wins(fragment);

        let mut inner = self.inner.write();
        let mark = inner.high_water_mark;
        let mut added = 0usize;
        let mut refreshed = false;

        for (epoch, candle) in incoming {
            match mark {
                Some(m) if epoch < m => {}
                Some(m) if epoch == m => {
                    if let Some(last) = inner.records.last_mut() {
                        if last.epoch_ms == m {
                            *last = candle;
                            refreshed = true;
                        }
                    }
                }
                _ => {
                    inner.records.push(candle);
                    added += 1;
                }
            }
        }

        if added > 0 {
            inner.records.sort_by_key(|c| c.epoch_ms);
            inner.high_water_mark = inner.records.last().map(|c| c.epoch_ms);
        }

        debug!(
            added,
            refreshed,
            len = inner.records.len(),
            high_water_mark = ?inner.high_water_mark,
            "series merged"
        );
        added
    }

    /// Immutable copy of the current series.
    pub fn snapshot(&self) -> Series {
        Series::from_sorted(self.inner.read().records.clone())
    }

    /// Epoch of the newest candle successfully ingested.
    pub fn high_water_mark(&self) -> Option<i64> {
        self.inner.read().high_water_mark
    }

    pub fn latest(&self) -> Option<CandleRecord> {
        self.inner.read().records.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SeriesStore")
            .field("len", &inner.records.len())
            .field("high_water_mark", &inner.high_water_mark)
            .finish()
    }
}

/// Epoch-keyed, ascending; later records overwrite earlier ones.
fn dedup_last_wins(records: Vec<CandleRecord>) -> BTreeMap<i64, CandleRecord> {
    records.into_iter().map(|c| (c.epoch_ms, c)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
