// =============================================================================
// Shared types used across the feed engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which path a batch of rows arrived through. The two paths tolerate an
/// empty batch differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ingest {
    Backfill,
    Incremental,
}

impl std::fmt::Display for Ingest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backfill => write!(f, "Backfill"),
            Self::Incremental => write!(f, "Incremental"),
        }
    }
}

/// Poller state machine: waiting for a tick, or running one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    Idle,
    Fetching,
}

impl Default for PollerState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching => write!(f, "Fetching"),
        }
    }
}

/// Published to consumers whenever a merge added at least one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesUpdate {
    pub added: usize,
    pub high_water_mark: i64,
    pub len: usize,
}
