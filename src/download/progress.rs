//! Progress and completion notifications.
//!
//! Observers register through [`Listeners::subscribe`] and receive values over
//! unbounded channels, so a slow observer never drops events and ordering is
//! preserved per subscriber. Closed receivers are pruned on the next emit.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use super::error::DownloadError;

/// Point-in-time progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Completion percentage, 0-100 (0 while the total is unknown, 100 for an empty resource).
    pub percentage: u8,
    /// Bytes received so far, including bytes resumed from disk.
    pub bytes_received: u64,
    /// Total bytes expected, or -1 when unknown.
    pub bytes_total: i64,
}

impl ProgressSnapshot {
    /// Builds a snapshot, deriving the percentage.
    #[must_use]
    pub fn new(bytes_received: u64, bytes_total: i64) -> Self {
        Self {
            percentage: percent(bytes_received, bytes_total),
            bytes_received,
            bytes_total,
        }
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::new(0, -1)
    }
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// The resource is complete at `file_path`.
    Succeeded,
    /// The caller canceled; partial data was removed.
    Canceled,
    /// Retries were exhausted or an internal fault occurred.
    Failed,
}

/// The single completion notification of a `start()` call.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    /// Terminal outcome.
    pub state: CompletionState,
    /// Resulting file, when one exists.
    pub file_path: Option<PathBuf>,
    /// Source address of the request (the original, not a fallback).
    pub source: Url,
    /// Time from start to completion.
    pub elapsed: Duration,
    /// Total bytes expected, or -1 when unknown.
    pub bytes_total: i64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Causing error for `Failed`.
    pub error: Option<Arc<DownloadError>>,
}

impl CompletionResult {
    /// Completion percentage, 0-100.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        percent(self.bytes_received, self.bytes_total)
    }

    /// Average throughput in KiB/s, truncated; 0 with no bytes or no elapsed time.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn throughput_kbps(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if self.bytes_received == 0 || secs <= 0.0 {
            return 0;
        }
        (self.bytes_received as f64 / 1024.0 / secs) as u64
    }

    /// Returns true for `Succeeded`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == CompletionState::Succeeded
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(received: u64, total: i64) -> u8 {
    if total < 0 {
        return 0;
    }
    // An empty resource is complete as soon as it exists.
    if total == 0 {
        return 100;
    }
    let total = total as u64;
    (u128::from(received.min(total)) * 100 / u128::from(total)) as u8
}

/// Fan-out list of notification subscribers.
#[derive(Debug)]
pub(crate) struct Listeners<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Listeners<T> {
    /// Registers a new subscriber.
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Sends `value` to every live subscriber.
    pub(crate) fn emit(&self, value: &T) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(value.clone()).is_ok());
    }
}
