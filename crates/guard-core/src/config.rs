use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a monitor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Interval between scheduling ticks (default: 30s).
    pub poll_interval: Duration,
    /// Default HTTP request timeout per probe; a site may override it.
    pub request_timeout: Duration,
    /// Consecutive failures required before a failure alert may fire (>= 1).
    pub failure_threshold: u32,
    /// Maximum number of probes in flight at once.
    pub max_concurrent_probes: usize,
    /// Maximum number of response-body bytes scanned for a keyword.
    pub body_scan_limit: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            failure_threshold: 10,
            max_concurrent_probes: 4,
            body_scan_limit: 64 * 1024,
        }
    }
}

impl GuardConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = max.max(1);
        self
    }

    pub fn with_body_scan_limit(mut self, limit: usize) -> Self {
        self.body_scan_limit = limit;
        self
    }
}
