//! Processor Settings
//!
//! Operational knobs for the stream processor. Defaults favor correctness in
//! tests and small deployments; throughput tuning is a matter of raising the
//! batch capacity and threshold.

use std::time::Duration;

use logflow_log::RetryPolicy;

/// Settings controlling batching, polling and transport retry.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Records per implicit batch before a boundary is forced (default: 10).
    pub batch_capacity: usize,

    /// Maximum age of a non-empty batch before a boundary is forced
    /// (default: 1s).
    pub batch_threshold: Duration,

    /// How long one input poll blocks before the worker rotates to its next
    /// input (default: 100ms).
    pub read_timeout: Duration,

    /// Retry policy for transient log failures (default: 3 retries,
    /// exponential backoff).
    pub retry: RetryPolicy,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_capacity: 10,
            batch_threshold: Duration::from_secs(1),
            read_timeout: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProcessorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity.max(1);
        self
    }

    pub fn batch_threshold(mut self, threshold: Duration) -> Self {
        self.batch_threshold = threshold;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
