// =============================================================================
// Normalizer — raw exchange rows → canonical candle records
// =============================================================================
//
// Rows are ordered oldest-first by their parsed open time. A row whose
// timestamp does not parse (or cannot be rendered as a wall-clock instant) is
// dropped on its own; a price field that does not parse becomes `None` and
// the rest of the row is kept.
// =============================================================================

use std::str::FromStr;

use chrono::FixedOffset;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::market_data::candle::{display_time, CandleRecord, RawKline};
use crate::types::Ingest;

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    offset: FixedOffset,
}

impl Normalizer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Convert `rows` into an epoch-ordered fragment.
    ///
    /// An empty input is an error only for [`Ingest::Backfill`]; an empty
    /// incremental batch just means nothing new happened.
    pub fn normalize(&self, rows: &[RawKline], ingest: Ingest) -> Result<Vec<CandleRecord>, FeedError> {
        if rows.is_empty() {
            return match ingest {
                Ingest::Backfill => Err(FeedError::EmptyInput),
                Ingest::Incremental => Ok(Vec::new()),
            };
        }

        let mut dropped = 0usize;
        let mut records: Vec<CandleRecord> = rows
            .iter()
            .filter_map(|row| {
                let parsed = self.normalize_row(row);
                if parsed.is_none() {
                    dropped += 1;
                }
                parsed
            })
            .collect();

        // Stable: rows sharing an epoch keep their ingestion order.
        records.sort_by_key(|c| c.epoch_ms);

        if dropped > 0 {
            warn!(dropped, kept = records.len(), %ingest, "dropped rows with unusable timestamps");
        }
        debug!(kept = records.len(), %ingest, "rows normalized");

        Ok(records)
    }

    fn normalize_row(&self, row: &RawKline) -> Option<CandleRecord> {
        let epoch_ms = parse_epoch_ms(&row.timestamp)?;
        display_time(epoch_ms, self.offset)?;

        Some(CandleRecord {
            epoch_ms,
            open: parse_decimal(&row.open),
            high: parse_decimal(&row.high),
            low: parse_decimal(&row.low),
            close: parse_decimal(&row.close),
            volume: parse_decimal(&row.volume),
            turnover: parse_decimal(&row.turnover),
        })
    }
}

/// Integer milliseconds; a float-looking timestamp ("1700000000000.0") is
/// accepted when it has no fractional part.
fn parse_epoch_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    let ms = Decimal::from_str(raw).ok()?;
    if !ms.fract().is_zero() {
        return None;
    }
    i64::try_from(ms).ok()
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
