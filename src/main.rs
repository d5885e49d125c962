// =============================================================================
// Kline Sync — Main Entry Point
// =============================================================================
//
// Startup: load config, backfill the lookback window, seed the series store,
// dump CSV snapshots, then hand over to the incremental poller. An empty
// backfill aborts startup; a partial one is accepted with a warning.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod bybit;
mod config;
mod error;
mod export;
mod market_data;
mod sync;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bybit::BybitClient;
use crate::config::FeedConfig;
use crate::export::SnapshotExporter;
use crate::market_data::{KlineSource, Normalizer, SeriesStore};
use crate::sync::{now_ms, Poller};
use crate::types::SeriesUpdate;

const DEFAULT_CONFIG_PATH: &str = "feed_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Kline Sync — Starting Up                          ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("FEED_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = FeedConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        FeedConfig::default()
    });
    config.apply_env_overrides()?;
    config.validate().context("invalid feed configuration")?;

    info!(
        symbol = %config.symbol,
        category = %config.category,
        interval_minutes = config.interval_minutes,
        history_hours = config.history_hours,
        poll_period_secs = config.poll_period_secs,
        "Feed configured"
    );

    // ── 2. Components ────────────────────────────────────────────────────
    let client = BybitClient::new(&config)?;
    let rate_limit = client.rate_limit().clone();
    let source: Arc<dyn KlineSource> = Arc::new(client);
    let store = Arc::new(SeriesStore::new());
    let normalizer = Normalizer::new(config.timezone_offset()?);
    let poller = Poller::new(source, store.clone(), normalizer, &config);

    let exporter = if config.export_snapshots {
        Some(SnapshotExporter::new(&config)?)
    } else {
        None
    };

    // ── 3. Historical backfill ───────────────────────────────────────────
    let backfill = poller
        .cold_start(now_ms())
        .await
        .context("historical backfill produced no usable candles")?;

    info!(
        loaded = backfill.rows.len(),
        expected = backfill.expected,
        series_len = store.len(),
        rate_limit = ?rate_limit.snapshot(),
        "History loaded"
    );

    if let Some(exporter) = &exporter {
        if let Err(e) = exporter.write_raw(&backfill.rows) {
            error!(error = %e, "Failed to save raw candles");
        }
        if let Err(e) = exporter.write_series(&store.snapshot()) {
            error!(error = %e, "Failed to save processed candles");
        }
    }

    // ── 4. Update reporter (stands in for the chart) ─────────────────────
    let updates = poller.subscribe();
    let report_store = store.clone();
    tokio::spawn(report_updates(updates, report_store));

    // ── 5. Incremental poller ────────────────────────────────────────────
    let poller_handle = tokio::spawn(poller.run());

    info!("Poller running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");
    poller_handle.abort();

    if let Some(exporter) = &exporter {
        if let Err(e) = exporter.write_series(&store.snapshot()) {
            error!(error = %e, "Failed to save processed candles on shutdown");
        }
    }

    info!(series_len = store.len(), "Kline Sync shut down complete.");
    Ok(())
}

/// Log every series update with the newest candle from a fresh snapshot.
async fn report_updates(mut updates: broadcast::Receiver<SeriesUpdate>, store: Arc<SeriesStore>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                let latest = store.latest();
                info!(
                    added = update.added,
                    len = update.len,
                    high_water_mark = update.high_water_mark,
                    close = ?latest.as_ref().and_then(|c| c.close),
                    volume = ?latest.as_ref().and_then(|c| c.volume),
                    "series updated"
                );
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "update reporter lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
