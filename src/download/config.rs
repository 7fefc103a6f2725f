//! Transfer configuration.
//!
//! [`TransferConfig`] carries every recognized option of the orchestrator and
//! its transfer worker. It derives serde so host applications can embed it in
//! their own configuration; this crate does not load configuration files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_PROGRESS_INTERVAL,
    DEFAULT_READ_TIMEOUT, DEFAULT_RELEASE_POLL_INTERVAL, DEFAULT_RELEASE_WAIT_TIMEOUT,
    DEFAULT_RETRY_DELAY, DEFAULT_SAFE_WAIT_TIMEOUT,
};

/// Options recognized by the orchestrator, worker, and HTTP client.
///
/// # Default Values
///
/// - `max_attempts`: 60
/// - `delay_between_attempts`: 3 seconds
/// - `safe_wait_timeout`: 15 seconds
/// - `read_timeout`: 5 seconds
/// - `connect_timeout`: 30 seconds
/// - `chunk_size`: 1 MiB
/// - `progress_interval`: 500 ms
/// - `release_wait_timeout`: 3 seconds, polled every `release_poll_interval` (500 ms)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum attempts per transfer, including the first (always >= 1).
    pub max_attempts: u32,
    /// Delay before a retry is issued.
    pub delay_between_attempts: Duration,
    /// How long a second `start()` waits for the gate, and how long a worker
    /// `cancel()` waits for stream release.
    pub safe_wait_timeout: Duration,
    /// Longest a single read from the source stream may stall.
    pub read_timeout: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// Copy buffer size in bytes.
    pub chunk_size: usize,
    /// Progress sampling interval of the worker.
    pub progress_interval: Duration,
    /// Bound on waiting for the destination file handle to be released.
    pub release_wait_timeout: Duration,
    /// Poll interval while waiting for the release.
    pub release_poll_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_between_attempts: DEFAULT_RETRY_DELAY,
            safe_wait_timeout: DEFAULT_SAFE_WAIT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            release_wait_timeout: DEFAULT_RELEASE_WAIT_TIMEOUT,
            release_poll_interval: DEFAULT_RELEASE_POLL_INTERVAL,
        }
    }
}

impl TransferConfig {
    /// Sets the attempt cap (clamped to at least 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_delay_between_attempts(mut self, delay: Duration) -> Self {
        self.delay_between_attempts = delay;
        self
    }

    /// Sets the safe-wait timeout used by `start()` and worker cancellation.
    #[must_use]
    pub fn with_safe_wait_timeout(mut self, timeout: Duration) -> Self {
        self.safe_wait_timeout = timeout;
        self
    }

    /// Sets the per-read stall timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the copy buffer size (clamped to at least 1 byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the progress sampling interval.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the destination release wait bound and its poll interval.
    #[must_use]
    pub fn with_release_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.release_wait_timeout = timeout;
        self.release_poll_interval = poll_interval;
        self
    }

    /// Attempt cap, never below 1 even when deserialized as 0.
    #[must_use]
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
