//! Constants for the download module (timeouts, attempt limits, intervals).

use std::time::Duration;

/// Default maximum number of attempts per transfer (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Default delay between attempts (3 seconds).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default time a serialized `start()` or a worker `cancel()` waits (15 seconds).
pub const DEFAULT_SAFE_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default source-stream read timeout (5 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default HTTP connect timeout (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default copy buffer size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default interval between worker progress samples (500 ms).
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Default bound on waiting for the OS to release the destination file (3 seconds).
pub const DEFAULT_RELEASE_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default poll interval while waiting for the destination file release (500 ms).
pub const DEFAULT_RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Suffix appended to temporary working files.
pub const TEMP_FILE_SUFFIX: &str = ".download";
