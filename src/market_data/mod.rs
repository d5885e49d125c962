pub mod candle;
pub mod normalizer;
pub mod series_store;
pub mod source;

// Re-exports for `use crate::market_data::SeriesStore` and friends.
pub use candle::{FetchWindow, RawKline, Series};
pub use normalizer::Normalizer;
pub use series_store::SeriesStore;
pub use source::KlineSource;
