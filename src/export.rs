// =============================================================================
// Snapshot export — CSV dumps of the raw backfill and the processed series
// =============================================================================
//
// Files land in `data_save_path` as
//   raw_{SYMBOL}_{YYYYmmdd_HHMM}.csv        (exchange rows, as fetched)
//   processed_{SYMBOL}_{YYYYmmdd_HHMM}.csv  (display_time, epoch_ms, OHLCV, turnover)
// The stamp is fixed when the exporter is built, so a later write of the
// processed series replaces the earlier one. Writes go to a `.tmp` sibling
// first and are renamed into place.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{FixedOffset, Local};
use serde::Serialize;
use tracing::info;

use crate::config::FeedConfig;
use crate::market_data::{RawKline, Series};

pub struct SnapshotExporter {
    dir: PathBuf,
    symbol: String,
    offset: FixedOffset,
    stamp: String,
}

impl SnapshotExporter {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        Ok(Self {
            dir: config.data_save_path.clone(),
            symbol: config.symbol.clone(),
            offset: config.timezone_offset()?,
            stamp: Local::now().format("%Y%m%d_%H%M").to_string(),
        })
    }

    pub fn raw_path(&self) -> PathBuf {
        self.dir.join(format!("raw_{}_{}.csv", self.symbol, self.stamp))
    }

    pub fn processed_path(&self) -> PathBuf {
        self.dir.join(format!("processed_{}_{}.csv", self.symbol, self.stamp))
    }

    /// Dump the backfill rows exactly as fetched.
    pub fn write_raw(&self, rows: &[RawKline]) -> Result<PathBuf> {
        let path = self.raw_path();
        write_csv(&path, rows)?;
        info!(path = %path.display(), rows = rows.len(), "raw candles saved");
        Ok(path)
    }

    /// Dump the series in its collaborator-facing shape.
    pub fn write_series(&self, series: &Series) -> Result<PathBuf> {
        let path = self.processed_path();
        let rows = series.to_rows(self.offset);
        write_csv(&path, &rows)?;
        info!(path = %path.display(), rows = rows.len(), "processed candles saved");
        Ok(path)
    }
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .with_context(|| format!("failed to open {}", tmp_path.display()))?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("failed to write row to {}", tmp_path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
    }

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp snapshot to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::candle::CandleRecord;
    use crate::market_data::SeriesStore;
    use rust_decimal::Decimal;

    fn exporter(dir: &Path) -> SnapshotExporter {
        let config = FeedConfig {
            data_save_path: dir.join("saved_data"),
            ..FeedConfig::default()
        };
        SnapshotExporter::new(&config).unwrap()
    }

    #[test]
    fn raw_rows_are_written_with_header() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = exporter(tmp.path());
        let rows = vec![RawKline::from_fields([
            "1700000000000".into(),
            "1".into(),
            "2".into(),
            "0.5".into(),
            "1.5".into(),
            "10".into(),
            "15".into(),
        ])];

        let path = exporter.write_raw(&rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,open,high,low,close,volume,turnover")
        );
        assert_eq!(lines.next(), Some("1700000000000,1,2,0.5,1.5,10,15"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("raw_BTCUSDT_"));
    }

    #[test]
    fn processed_series_carries_display_time_and_blank_missing_values() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = exporter(tmp.path());
        let store = SeriesStore::new();
        store.initialize(vec![CandleRecord {
            epoch_ms: 1_700_000_000_000,
            open: Some(Decimal::new(37000, 0)),
            high: None,
            low: Some(Decimal::new(36990, 0)),
            close: Some(Decimal::new(37020, 0)),
            volume: Some(Decimal::new(15, 1)),
            turnover: None,
        }]);

        let path = exporter.write_series(&store.snapshot()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("display_time,epoch_ms,open,high,low,close,volume,turnover")
        );
        assert_eq!(
            lines.next(),
            Some("2023-11-15T01:13:20,1700000000000,37000,,36990,37020,1.5,")
        );
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn second_series_write_replaces_the_first() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = exporter(tmp.path());
        let store = SeriesStore::new();

        exporter.write_series(&store.snapshot()).unwrap();
        store.initialize(vec![CandleRecord {
            epoch_ms: 0,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            turnover: None,
        }]);
        let path = exporter.write_series(&store.snapshot()).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
