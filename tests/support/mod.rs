//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod fake_transport;
#[path = "../../src/test_support/socket_guard.rs"]
pub mod socket_guard;

use std::time::Duration;

use transfer_core::TransferConfig;

/// Installs a test-writer tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Configuration with short delays so retry paths finish quickly.
#[must_use]
pub fn fast_config() -> TransferConfig {
    TransferConfig::default()
        .with_max_attempts(5)
        .with_delay_between_attempts(Duration::from_millis(20))
        .with_safe_wait_timeout(Duration::from_secs(2))
        .with_read_timeout(Duration::from_secs(5))
        .with_chunk_size(16)
        .with_progress_interval(Duration::from_millis(10))
        .with_release_wait(Duration::from_millis(200), Duration::from_millis(20))
}

/// Deterministic test payload of `len` bytes.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect()
}
