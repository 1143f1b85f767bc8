//! Retry/backoff decisions for transfer failures.
//!
//! Mirrors the classify-then-decide split used elsewhere in this codebase
//! for download retries: a [`TransferError`] is classified, then the
//! classification and attempt count together determine whether — and after
//! how long — to retry.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::config::ExecutorConfig;
use crate::error::TransferError;

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay. `attempt` is the attempt number the
    /// retry will be (1-indexed).
    Retry { delay: Duration, attempt: u32 },
    /// Give up. `reason` is recorded as the state entry's `last_sync_error`.
    GiveUp { reason: String },
}

/// Classifies a [`TransferError`] and decides whether `attempt` (the attempt
/// that just failed, 1-indexed) should be retried under `config`.
#[must_use]
pub fn decide(config: &ExecutorConfig, error: &TransferError, attempt: u32) -> RetryDecision {
    if matches!(error, TransferError::FileGoneDuringTransfer) {
        return RetryDecision::GiveUp {
            reason: error.message(),
        };
    }

    if attempt >= config.max_retries {
        debug!(
            attempt,
            max = config.max_retries,
            "transfer retries exhausted"
        );
        return RetryDecision::GiveUp {
            reason: format!(
                "max attempts ({}) exhausted: {}",
                config.max_retries,
                error.message()
            ),
        };
    }

    RetryDecision::Retry {
        delay: calculate_delay(config, attempt),
        attempt: attempt + 1,
    }
}

/// `min(base_delay * 2^(attempt - 1), max_delay) + jitter`.
fn calculate_delay(config: &ExecutorConfig, attempt: u32) -> Duration {
    let base_ms = config.base_delay.as_millis() as f64;
    let exponent = f64::from(attempt.saturating_sub(1));
    let delay_ms = base_ms * 2f64.powf(exponent);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as f64);

    let jitter_ms = if config.max_jitter.is_zero() {
        0
    } else {
        rand::thread_rng().gen_range(0..=config.max_jitter.as_millis() as u64)
    };

    Duration::from_millis(capped_ms as u64) + Duration::from_millis(jitter_ms)
}
