//! Per-`start()` session state and its cancellation lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::client::ResponseMeta;
use super::filename::temp_working_path;
use super::progress::ProgressSnapshot;
use super::worker::TransferWorker;

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source address. Cache records are keyed by this even after a fallback.
    pub source: Url,
    /// Destination file, or destination directory when the server name is preserved.
    pub destination: PathBuf,
    /// Name the final file after the server-provided name.
    pub preserve_server_filename: bool,
    /// Creation time; seeds the temporary working file name.
    pub created_at: SystemTime,
}

impl TransferRequest {
    /// Creates a request stamped with the current time.
    #[must_use]
    pub fn new(source: Url, destination: PathBuf, preserve_server_filename: bool) -> Self {
        Self {
            source,
            destination,
            preserve_server_filename,
            created_at: SystemTime::now(),
        }
    }

    /// File the transfer writes into until it completes.
    #[must_use]
    pub fn working_path(&self) -> PathBuf {
        if self.preserve_server_filename {
            temp_working_path(&self.destination, self.created_at)
        } else {
            self.destination.clone()
        }
    }
}

/// Mutable state owned by the session task.
#[derive(Debug)]
pub(crate) struct TransferSession {
    pub(crate) request: TransferRequest,
    /// Network address in use; differs from `request.source` after a fallback.
    pub(crate) source: Url,
    pub(crate) working_path: PathBuf,
    pub(crate) meta: ResponseMeta,
    pub(crate) bytes_received: u64,
    pub(crate) bytes_total: i64,
    pub(crate) attempt: u32,
    pub(crate) resume_enabled: bool,
    pub(crate) fallback_considered: bool,
    pub(crate) fallback_used: bool,
    /// Set once the working file belongs to this session.
    pub(crate) owns_working_file: bool,
    pub(crate) last_published: u64,
    pub(crate) started: Instant,
}

impl TransferSession {
    pub(crate) fn new(request: TransferRequest, resume_enabled: bool) -> Self {
        Self {
            source: request.source.clone(),
            working_path: request.working_path(),
            request,
            meta: ResponseMeta::default(),
            bytes_received: 0,
            bytes_total: -1,
            attempt: 1,
            resume_enabled,
            fallback_considered: false,
            fallback_used: false,
            owns_working_file: false,
            last_published: 0,
            started: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.bytes_received, self.bytes_total)
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn set_total(&mut self, total: u64) {
        self.bytes_total = total as i64;
    }

    /// Total as a known length, if any.
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn known_total(&self) -> Option<u64> {
        (self.bytes_total >= 0).then_some(self.bytes_total as u64)
    }
}

#[derive(Debug, Default)]
struct ControlState {
    settled: bool,
    worker: Option<Arc<TransferWorker>>,
}

/// Cancellation lock shared by the session task and `cancel()` callers.
///
/// Whoever settles first decides the terminal state: a cancel request, or the
/// session task claiming success or failure.
#[derive(Debug, Default)]
pub(crate) struct SessionControl {
    token: CancellationToken,
    state: Mutex<ControlState>,
}

impl SessionControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Claims the terminal state for cancellation.
    ///
    /// Returns `None` if the session already settled (the call is a no-op),
    /// otherwise the worker to stop, if one is running.
    pub(crate) async fn request_cancel(&self) -> Option<Option<Arc<TransferWorker>>> {
        let mut state = self.state.lock().await;
        if state.settled {
            return None;
        }
        state.settled = true;
        self.token.cancel();
        Some(state.worker.clone())
    }

    /// Claims the terminal state for the session task. False if cancel won.
    pub(crate) async fn settle(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.settled {
            return false;
        }
        state.settled = true;
        true
    }

    /// Publishes the running worker. False if a cancel already settled the session.
    pub(crate) async fn attach_worker(&self, worker: Arc<TransferWorker>) -> bool {
        let mut state = self.state.lock().await;
        if state.settled {
            return false;
        }
        state.worker = Some(worker);
        true
    }

    pub(crate) async fn detach_worker(&self) {
        self.state.lock().await.worker = None;
    }
}
