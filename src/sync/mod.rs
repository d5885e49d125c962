// =============================================================================
// Synchronization: historical backfill, incremental polling, shared retry
// =============================================================================

pub mod backfill;
pub mod poller;
pub mod retry;

pub use poller::{now_ms, Poller};
