use chrono::{DateTime, FixedOffset, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// One kline row exactly as the exchange returned it:
/// `[timestamp, open, high, low, close, volume, turnover]`, all text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKline {
    pub timestamp: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub turnover: String,
}

impl RawKline {
    pub fn from_fields(fields: [String; 7]) -> Self {
        let [timestamp, open, high, low, close, volume, turnover] = fields;
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            turnover,
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

/// One normalized candle. `epoch_ms` (the exchange-reported open time) is the
/// only identity; price fields are `None` when the exchange sent something
/// that does not parse as a decimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub epoch_ms: i64,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub turnover: Option<Decimal>,
}

impl CandleRecord {
    /// Wall-clock time of the candle open, shifted by `offset`.
    pub fn display_time(&self, offset: FixedOffset) -> Option<NaiveDateTime> {
        display_time(self.epoch_ms, offset)
    }
}

/// Derive the display timestamp for an epoch. `None` when the epoch is
/// outside chrono's representable range.
pub fn display_time(epoch_ms: i64, offset: FixedOffset) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(epoch_ms).map(|utc| utc.with_timezone(&offset).naive_local())
}

/// The shape handed to collaborators (exporter, renderer).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleRow {
    pub display_time: NaiveDateTime,
    pub epoch_ms: i64,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub turnover: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Fetch windows
// ---------------------------------------------------------------------------

/// Half-open query interval `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchWindow {
    start_ms: i64,
    end_ms: i64,
}

impl FetchWindow {
    /// `None` unless `start_ms < end_ms`.
    pub fn new(start_ms: i64, end_ms: i64) -> Option<Self> {
        (start_ms < end_ms).then_some(Self { start_ms, end_ms })
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }

    #[cfg(test)]
    pub fn width_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

impl std::fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start_ms, self.end_ms)
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Read-only, strictly epoch-ordered candle sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Series(Vec<CandleRecord>);

impl Series {
    pub(crate) fn from_sorted(records: Vec<CandleRecord>) -> Self {
        Self(records)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&CandleRecord> {
        self.0.last()
    }

    /// Strictly increasing by epoch (and therefore duplicate-free).
    #[cfg(test)]
    pub fn is_strictly_increasing(&self) -> bool {
        self.0.windows(2).all(|w| w[0].epoch_ms < w[1].epoch_ms)
    }

    /// Missing stretches between neighbouring candles, as
    /// `(last_present_epoch, next_present_epoch)` pairs.
    pub fn gaps(&self, interval_ms: i64) -> Vec<(i64, i64)> {
        if interval_ms <= 0 {
            return Vec::new();
        }
        self.0
            .windows(2)
            .filter(|w| w[1].epoch_ms - w[0].epoch_ms > interval_ms)
            .map(|w| (w[0].epoch_ms, w[1].epoch_ms))
            .collect()
    }

    /// Candles absent between the first and last record.
    pub fn missing_candles(&self, interval_ms: i64) -> i64 {
        self.gaps(interval_ms)
            .iter()
            .map(|(a, b)| (b - a) / interval_ms - 1)
            .sum()
    }

    /// Collaborator-facing rows with the display timestamp filled in.
    pub fn to_rows(&self, offset: FixedOffset) -> Vec<CandleRow> {
        self.0
            .iter()
            .filter_map(|c| {
                Some(CandleRow {
                    display_time: c.display_time(offset)?,
                    epoch_ms: c.epoch_ms,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                    turnover: c.turnover,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bare(epoch_ms: i64) -> CandleRecord {
        CandleRecord {
            epoch_ms,
            open: None,
            high: None,
            low: None,
            close: Some(Decimal::new(100, 0)),
            volume: None,
            turnover: None,
        }
    }

    #[test]
    fn display_time_shifts_by_offset() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let shown = display_time(1_700_000_000_000, offset).unwrap();
        // 2023-11-14 22:13:20 UTC + 3h
        let expected = NaiveDate::from_ymd_opt(2023, 11, 15)
            .unwrap()
            .and_hms_opt(1, 13, 20)
            .unwrap();
        assert_eq!(shown, expected);
    }

    #[test]
    fn fetch_window_requires_start_before_end() {
        assert!(FetchWindow::new(10, 10).is_none());
        assert!(FetchWindow::new(11, 10).is_none());
        let w = FetchWindow::new(10, 70).unwrap();
        assert_eq!(w.width_ms(), 60);
        assert_eq!(w.to_string(), "[10, 70)");
    }

    #[test]
    fn gaps_report_missing_stretches() {
        let series = Series::from_sorted(vec![bare(0), bare(60_000), bare(240_000), bare(300_000)]);
        assert_eq!(series.gaps(60_000), vec![(60_000, 240_000)]);
        assert_eq!(series.missing_candles(60_000), 2);
        assert!(series.is_strictly_increasing());
    }

    #[test]
    fn rows_carry_display_time() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let series = Series::from_sorted(vec![bare(0)]);
        let rows = series.to_rows(offset);
        assert_eq!(rows.len(), 1);
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(rows[0].display_time, epoch);
        assert_eq!(rows[0].close, Some(Decimal::new(100, 0)));
    }
}
