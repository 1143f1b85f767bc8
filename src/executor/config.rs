//! Tunables for the transfer executor.

use std::time::Duration;

/// Concurrency and retry/backoff tunables for the transfer executor.
///
/// # Default Values
///
/// - `max_concurrent_uploads`: 3
/// - `max_concurrent_downloads`: 3
/// - `max_retries`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `max_jitter`: 500ms
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of uploads in flight at once.
    pub max_concurrent_uploads: usize,
    /// Maximum number of downloads in flight at once.
    pub max_concurrent_downloads: usize,
    /// Maximum attempts per transfer, including the initial one.
    pub max_retries: u32,
    /// Base delay for the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap, reached once the exponential backoff grows past it.
    pub max_delay: Duration,
    /// Upper bound on the random jitter added to each computed delay.
    pub max_jitter: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 3,
            max_concurrent_downloads: 3,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            max_jitter: Duration::from_millis(500),
        }
    }
}
