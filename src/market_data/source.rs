use async_trait::async_trait;

use crate::error::FeedError;
use crate::market_data::candle::{FetchWindow, RawKline};

/// A single-attempt kline query. Implementations never retry on their own;
/// every failure comes back as [`FeedError::Transient`].
#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch(&self, window: FetchWindow, limit: u32) -> Result<Vec<RawKline>, FeedError>;
}
