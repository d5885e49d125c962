// =============================================================================
// Feed error taxonomy
// =============================================================================
//
// Transient          network / timeout / non-success status / malformed body.
//                    Always retryable; bounded by the retry policy.
// BackfillIncomplete at least one backfill window was abandoned after its
//                    retries ran out. Warning-level; callers keep the partial
//                    series.
// EmptyInput         the historical load produced no rows at all. Fatal to the
//                    startup sequence.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("backfill incomplete: {skipped} of {total} windows skipped")]
    BackfillIncomplete { skipped: usize, total: usize },

    #[error("no candle rows to normalize")]
    EmptyInput,
}

impl FeedError {
    pub fn transient(msg: impl std::fmt::Display) -> Self {
        Self::Transient(msg.to_string())
    }

    /// Only `Transient` failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {err}"))
        } else {
            Self::Transient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(FeedError::transient("boom").is_retryable());
        assert!(!FeedError::EmptyInput.is_retryable());
        assert!(!FeedError::BackfillIncomplete { skipped: 1, total: 8 }.is_retryable());
    }

    #[test]
    fn incomplete_message_names_counts() {
        let err = FeedError::BackfillIncomplete { skipped: 2, total: 8 };
        assert_eq!(err.to_string(), "backfill incomplete: 2 of 8 windows skipped");
    }
}
