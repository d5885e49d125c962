// =============================================================================
// Feed Configuration — process-wide settings fixed at startup
// =============================================================================
//
// Every tunable of the ingestion engine lives here: which market to follow,
// how much history to backfill, how hard to retry, and how often to poll.
// The struct is built once in main and handed to each component; there is no
// hot reload.
//
// All fields carry `#[serde(default)]` so that a partial (or empty) JSON file
// still loads.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Hard cap on candles per kline request.
pub const MAX_CANDLES_PER_REQUEST: u32 = 200;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_category() -> String {
    "spot".to_string()
}

fn default_interval_minutes() -> u32 {
    1
}

fn default_history_hours() -> u32 {
    24
}

fn default_candles_per_request() -> u32 {
    MAX_CANDLES_PER_REQUEST
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_pause_secs() -> u64 {
    2
}

fn default_request_delay_secs() -> u64 {
    1
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_timezone_offset_hours() -> i32 {
    3
}

fn default_poll_period_secs() -> u64 {
    60
}

fn default_data_save_path() -> PathBuf {
    PathBuf::from("saved_data/")
}

// =============================================================================
// FeedConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    // --- Market --------------------------------------------------------------

    /// REST host of the market-data API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Trading pair, e.g. "BTCUSDT".
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Market category ("spot", "linear", ...).
    #[serde(default = "default_category")]
    pub category: String,

    /// Candle width in minutes.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,

    // --- Backfill ------------------------------------------------------------

    /// How many hours of history to load on a cold start.
    #[serde(default = "default_history_hours")]
    pub history_hours: u32,

    /// Candles requested per call. Clamped to [`MAX_CANDLES_PER_REQUEST`].
    #[serde(default = "default_candles_per_request")]
    pub candles_per_request: u32,

    /// Attempts per backfill window before it is skipped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between attempts on the same window.
    #[serde(default = "default_retry_pause_secs")]
    pub retry_pause_secs: u64,

    /// Pause between consecutive backfill requests (rate-limit courtesy).
    #[serde(default = "default_request_delay_secs")]
    pub request_delay_secs: u64,

    /// Per-request network timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // --- Presentation / polling ---------------------------------------------

    /// Fixed offset (hours east of UTC) used to derive display timestamps.
    #[serde(default = "default_timezone_offset_hours")]
    pub timezone_offset_hours: i32,

    /// Incremental poll period.
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,

    // --- Export --------------------------------------------------------------

    /// Directory that receives CSV snapshots.
    #[serde(default = "default_data_save_path")]
    pub data_save_path: PathBuf,

    /// Write raw/processed CSV snapshots after the backfill and on shutdown.
    #[serde(default = "default_true")]
    pub export_snapshots: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            symbol: default_symbol(),
            category: default_category(),
            interval_minutes: default_interval_minutes(),
            history_hours: default_history_hours(),
            candles_per_request: default_candles_per_request(),
            max_retries: default_max_retries(),
            retry_pause_secs: default_retry_pause_secs(),
            request_delay_secs: default_request_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            timezone_offset_hours: default_timezone_offset_hours(),
            poll_period_secs: default_poll_period_secs(),
            data_save_path: default_data_save_path(),
            export_snapshots: true,
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse feed config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            category = %config.category,
            "feed config loaded"
        );

        Ok(config)
    }

    /// Apply `FEED_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(sym) = lookup("FEED_SYMBOL") {
            let sym = sym.trim().to_uppercase();
            if !sym.is_empty() {
                self.symbol = sym;
            }
        }
        if let Some(cat) = lookup("FEED_CATEGORY") {
            self.category = cat.trim().to_lowercase();
        }
        if let Some(url) = lookup("FEED_BASE_URL") {
            self.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(hours) = lookup("FEED_HISTORY_HOURS") {
            self.history_hours = hours
                .trim()
                .parse()
                .with_context(|| format!("FEED_HISTORY_HOURS is not a number: {hours}"))?;
        }
        if let Some(secs) = lookup("FEED_POLL_SECS") {
            self.poll_period_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("FEED_POLL_SECS is not a number: {secs}"))?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.symbol.is_empty(), "symbol must not be empty");
        anyhow::ensure!(self.interval_minutes > 0, "interval_minutes must be > 0");
        anyhow::ensure!(self.history_hours > 0, "history_hours must be > 0");
        anyhow::ensure!(self.candles_per_request > 0, "candles_per_request must be > 0");
        anyhow::ensure!(self.max_retries > 0, "max_retries must be > 0");
        anyhow::ensure!(self.poll_period_secs > 0, "poll_period_secs must be > 0");
        self.timezone_offset()?;
        Ok(())
    }

    /// Candles per request after applying the API cap.
    pub fn request_limit(&self) -> u32 {
        self.candles_per_request.min(MAX_CANDLES_PER_REQUEST)
    }

    pub fn timezone_offset(&self) -> Result<FixedOffset> {
        self.timezone_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .with_context(|| {
                format!("timezone offset out of range: {}h", self.timezone_offset_hours)
            })
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.retry_pause_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs(self.request_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }
}
