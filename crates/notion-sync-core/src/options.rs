use std::time::Duration;

/// Knobs for remote traffic shaping and the archival pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of remote calls in flight during crawl and fetch phases.
    pub parallel_limit: usize,
    /// Minimum spacing between dispatches once a call is in flight.
    pub request_delay: Duration,
    /// Total attempts per remote call (first try included).
    pub max_retry_attempts: u32,
    /// Backoff before the second attempt; doubles on every further attempt.
    pub retry_initial_delay: Duration,
    /// Depth ceiling for the page crawl and for fetching nested blocks.
    pub max_depth: usize,
    /// Archive remote pages that have no local counterpart.
    pub delete_orphans: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            parallel_limit: 3,
            request_delay: Duration::from_millis(340),
            max_retry_attempts: 5,
            retry_initial_delay: Duration::from_secs(1),
            max_depth: 8,
            delete_orphans: false,
        }
    }
}
