// =============================================================================
// Bybit REST Client — public v5 kline endpoint
// =============================================================================
//
// One call = one HTTP GET with a fixed timeout. No retry happens here; the
// caller owns the retry policy. Every failure (transport, timeout, non-2xx,
// non-zero retCode, undecodable body) surfaces as `FeedError::Transient`.
//
// Response envelope:
//   { "retCode": 0, "retMsg": "OK",
//     "result": { "list": [[ts, open, high, low, close, volume, turnover], ...] } }
// Rows arrive newest-first; ordering is the normalizer's job.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::bybit::rate_limit::RateLimitTracker;
use crate::config::{FeedConfig, MAX_CANDLES_PER_REQUEST};
use crate::error::FeedError;
use crate::market_data::{FetchWindow, KlineSource, RawKline};

const KLINE_PATH: &str = "/v5/market/kline";

/// Bybit public market-data client bound to one symbol/category/interval.
#[derive(Clone)]
pub struct BybitClient {
    base_url: String,
    category: String,
    symbol: String,
    interval: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BybitClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(config: &FeedConfig) -> Result<Self> {
        Self::with_timeout(config, config.request_timeout())
    }

    pub fn with_timeout(config: &FeedConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        debug!(base_url = %base_url, symbol = %config.symbol, "BybitClient initialised");

        Ok(Self {
            base_url,
            category: config.category.clone(),
            symbol: config.symbol.clone(),
            interval: config.interval_minutes.to_string(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        })
    }

    pub fn rate_limit(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limit
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// Query parameters for one kline call.
    fn kline_query(&self, window: FetchWindow, limit: u32) -> Vec<(&'static str, String)> {
        vec![
            ("category", self.category.clone()),
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.clone()),
            ("start", window.start_ms().to_string()),
            ("end", window.end_ms().to_string()),
            ("limit", limit.clamp(1, MAX_CANDLES_PER_REQUEST).to_string()),
        ]
    }

    /// GET /v5/market/kline for `window`.
    #[instrument(skip(self), fields(symbol = %self.symbol), name = "bybit::get_klines")]
    pub async fn get_klines(&self, window: FetchWindow, limit: u32) -> Result<Vec<RawKline>, FeedError> {
        let url = format!("{}{}", self.base_url, KLINE_PATH);

        let resp = self
            .client
            .get(&url)
            .query(&self.kline_query(window, limit))
            .send()
            .await?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(FeedError::transient(format!(
                "Bybit GET {KLINE_PATH} returned {status}: {}",
                truncate(&body, 256)
            )));
        }

        let rows = parse_kline_body(&body)?;
        debug!(count = rows.len(), %window, "klines fetched");
        Ok(rows)
    }
}

#[async_trait]
impl KlineSource for BybitClient {
    async fn fetch(&self, window: FetchWindow, limit: u32) -> Result<Vec<RawKline>, FeedError> {
        self.get_klines(window, limit).await
    }
}

impl std::fmt::Debug for BybitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitClient")
            .field("base_url", &self.base_url)
            .field("category", &self.category)
            .field("symbol", &self.symbol)
            .field("interval", &self.interval)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Response decoding
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<serde_json::Value>>,
}

/// Decode a kline response body. Rows shorter than seven fields are skipped;
/// a missing `result` is an empty page.
fn parse_kline_body(body: &str) -> Result<Vec<RawKline>, FeedError> {
    let envelope: KlineEnvelope = serde_json::from_str(body).map_err(|e| {
        FeedError::transient(format!(
            "failed to parse kline response: {e} (body: {})",
            truncate(body, 256)
        ))
    })?;

    if envelope.ret_code != 0 {
        return Err(FeedError::transient(format!(
            "Bybit returned error {}: {}",
            envelope.ret_code, envelope.ret_msg
        )));
    }

    let Some(result) = envelope.result else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::with_capacity(result.list.len());
    for entry in result.list {
        if entry.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", entry.len());
            continue;
        }
        let mut fields = entry.iter().take(7).map(value_text);
        let fields: [String; 7] = std::array::from_fn(|_| fields.next().unwrap_or_default());
        rows.push(RawKline::from_fields(fields));
    }
    Ok(rows)
}

/// Bybit sends strings; tolerate bare numbers. Anything else becomes an empty
/// field the normalizer will treat as unparsable.
fn value_text(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
