//! Transfer orchestrator: one resumable, retrying transfer at a time.
//!
//! [`TransferOrchestrator::start`] acquires a single-flight gate (waiting up to
//! the safe-wait timeout for a previous session to finish), then drives the
//! session on a spawned task:
//!
//! 1. With caching enabled, probe the total size and let the
//!    [`ResumeCoordinator`] pick a resume offset (or serve a complete cached copy).
//! 2. Open the body from that offset and hand it to a [`TransferWorker`].
//! 3. On failure, consult the [`RetryPolicy`]: delay and retry, switch to a
//!    fallback address, or give up.
//! 4. On success, apply the server filename if requested, update the cache,
//!    and wait for the file to be released.
//!
//! Every `start()` that returns `Ok` produces exactly one [`CompletionResult`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use transfer_core::download::{HttpClient, MemoryCache, TransferConfig, TransferOrchestrator};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransferConfig::default();
//! let orchestrator = TransferOrchestrator::builder(Arc::new(HttpClient::new(&config)?))
//!     .config(config)
//!     .cache(Arc::new(MemoryCache::new()))
//!     .build();
//!
//! let source = Url::parse("https://example.com/disk.img")?;
//! let handle = orchestrator.start(source, "./downloads", true).await?;
//! if let Some(result) = handle.wait().await {
//!     println!("{:?} in {:?}", result.state, result.elapsed);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncSeekExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::cache::CacheStore;
use super::client::HttpTransport;
use super::config::TransferConfig;
use super::error::{DownloadError, StartError};
use super::filename::server_filename;
use super::fs::{
    create_empty, ensure_dir, is_locked, move_replace, remove_best_effort, sibling_temp_dir,
    wait_for_release,
};
use super::progress::{CompletionResult, CompletionState, Listeners, ProgressSnapshot};
use super::resume::{ResumeCoordinator, ResumePlan};
use super::retry::{DnsFallback, RetryDecision, RetryPolicy};
use super::session::{SessionControl, TransferRequest, TransferSession};
use super::worker::{
    CopyTarget, TransferWorker, WorkerEvent, WorkerEventKind, WorkerOptions, WorkerOutcome,
};

/// Builder for [`TransferOrchestrator`].
#[derive(Debug)]
pub struct OrchestratorBuilder {
    transport: Arc<dyn HttpTransport>,
    config: TransferConfig,
    cache: Option<Arc<dyn CacheStore>>,
    fallback: Option<Arc<dyn DnsFallback>>,
}

impl OrchestratorBuilder {
    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables caching and resume through `cache`.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enables DNS fallback through `fallback`.
    #[must_use]
    pub fn fallback(mut self, fallback: Arc<dyn DnsFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Builds the orchestrator.
    #[must_use]
    pub fn build(self) -> TransferOrchestrator {
        let mut policy = RetryPolicy::new(
            self.config.effective_max_attempts(),
            self.config.delay_between_attempts,
        );
        if let Some(fallback) = self.fallback {
            policy = policy.with_fallback(fallback);
        }
        TransferOrchestrator {
            inner: Arc::new(Inner {
                transport: self.transport,
                coordinator: ResumeCoordinator::new(self.cache),
                policy,
                config: self.config,
                gate: Arc::new(Semaphore::new(1)),
                active: Mutex::new(None),
                progress: Mutex::new(ProgressSnapshot::default()),
                progress_listeners: Listeners::default(),
                completion_listeners: Listeners::default(),
            }),
        }
    }
}

/// Awaitable completion of one `start()` call.
#[derive(Debug)]
pub struct TransferHandle {
    source: Url,
    completion: oneshot::Receiver<CompletionResult>,
}

impl TransferHandle {
    /// Source address the transfer was started with.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Waits for the completion notification.
    ///
    /// Returns `None` only if the session task was aborted before finishing.
    pub async fn wait(self) -> Option<CompletionResult> {
        self.completion.await.ok()
    }
}

/// Drives resumable transfers, one at a time.
#[derive(Debug)]
pub struct TransferOrchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: TransferConfig,
    transport: Arc<dyn HttpTransport>,
    coordinator: ResumeCoordinator,
    policy: RetryPolicy,
    gate: Arc<Semaphore>,
    active: Mutex<Option<Arc<SessionControl>>>,
    progress: Mutex<ProgressSnapshot>,
    progress_listeners: Listeners<ProgressSnapshot>,
    completion_listeners: Listeners<CompletionResult>,
}

enum AttemptOutcome {
    Succeeded,
    CacheHit(PathBuf),
    Canceled,
    Failed(DownloadError),
}

enum Terminal {
    Succeeded { path: PathBuf, elapsed: Duration },
    Canceled,
    Failed(DownloadError),
}

impl TransferOrchestrator {
    /// Starts building an orchestrator around `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn HttpTransport>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            transport,
            config: TransferConfig::default(),
            cache: None,
            fallback: None,
        }
    }

    /// Creates an orchestrator without caching or DNS fallback.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, config: TransferConfig) -> Self {
        Self::builder(transport).config(config).build()
    }

    /// Starts transferring `source`.
    ///
    /// With `preserve_server_filename`, `destination` is a directory and the
    /// final name comes from the server; otherwise `destination` is the file.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::ConcurrentStartRejected`] if the previous session
    /// did not finish within the safe-wait timeout.
    #[instrument(skip(self, destination), fields(source = %source))]
    pub async fn start(
        &self,
        source: Url,
        destination: impl Into<PathBuf>,
        preserve_server_filename: bool,
    ) -> Result<TransferHandle, StartError> {
        let waited = self.inner.config.safe_wait_timeout;
        let permit = match tokio::time::timeout(waited, Arc::clone(&self.inner.gate).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!(?waited, "previous transfer still running; start rejected");
                return Err(StartError::ConcurrentStartRejected { waited });
            }
        };

        let request = TransferRequest::new(source.clone(), destination.into(), preserve_server_filename);
        let session = TransferSession::new(request, self.inner.coordinator.is_enabled());
        let control = Arc::new(SessionControl::new());
        *lock(&self.inner.active) = Some(Arc::clone(&control));
        *lock(&self.inner.progress) = ProgressSnapshot::default();

        info!(
            destination = %session.request.destination.display(),
            preserve_server_filename,
            "transfer started"
        );
        let (reply, completion) = oneshot::channel();
        tokio::spawn(run_session(Arc::clone(&self.inner), session, control, permit, reply));
        Ok(TransferHandle { source, completion })
    }

    /// Starts transferring `source` into `dir` under the server-provided name.
    ///
    /// # Errors
    ///
    /// See [`TransferOrchestrator::start`].
    pub async fn start_into_dir(
        &self,
        source: Url,
        dir: impl Into<PathBuf>,
    ) -> Result<TransferHandle, StartError> {
        self.start(source, dir, true).await
    }

    /// Cancels the running session, if any.
    ///
    /// Idempotent: repeated calls, calls after completion, and calls with no
    /// active session are no-ops. Returns once the worker released its streams
    /// (or the safe-wait timeout passed).
    #[instrument(skip(self))]
    pub async fn cancel(&self) {
        let control = lock(&self.inner.active).clone();
        let Some(control) = control else {
            debug!("cancel with no active transfer");
            return;
        };
        match control.request_cancel().await {
            None => debug!("transfer already settled; cancel ignored"),
            Some(worker) => {
                info!("cancel requested");
                if let Some(worker) = worker {
                    worker.cancel().await;
                }
            }
        }
    }

    /// Subscribes to progress snapshots.
    #[must_use]
    pub fn subscribe_progress(&self) -> mpsc::UnboundedReceiver<ProgressSnapshot> {
        self.inner.progress_listeners.subscribe()
    }

    /// Subscribes to completion notifications.
    #[must_use]
    pub fn subscribe_completion(&self) -> mpsc::UnboundedReceiver<CompletionResult> {
        self.inner.completion_listeners.subscribe()
    }

    /// Latest progress of the current (or last) session.
    #[must_use]
    pub fn progress(&self) -> ProgressSnapshot {
        *lock(&self.inner.progress)
    }

    /// Bytes received by the current (or last) session.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.progress().bytes_received
    }

    /// Total bytes of the current (or last) session, or -1 when unknown.
    #[must_use]
    pub fn bytes_total(&self) -> i64 {
        self.progress().bytes_total
    }

    /// Returns true while a session holds the gate.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.gate.available_permits() == 0
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.inner.config
    }

    /// Maximum attempts per session.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.inner.policy.max_attempts()
    }

    /// Delay between regular retries.
    #[must_use]
    pub fn delay_between_attempts(&self) -> Duration {
        self.inner.policy.delay()
    }

    /// How long `start` waits for the gate and `cancel` waits for release.
    #[must_use]
    pub fn safe_wait_timeout(&self) -> Duration {
        self.inner.config.safe_wait_timeout
    }
}

impl Drop for TransferOrchestrator {
    fn drop(&mut self) {
        if let Some(control) = lock(&self.inner.active).as_ref() {
            control.token().cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[instrument(skip_all, fields(source = %session.request.source))]
async fn run_session(
    inner: Arc<Inner>,
    mut session: TransferSession,
    control: Arc<SessionControl>,
    permit: OwnedSemaphorePermit,
    reply: oneshot::Sender<CompletionResult>,
) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let terminal = loop {
        if control.is_canceled() {
            break Terminal::Canceled;
        }
        debug!(attempt = session.attempt, source = %session.source, "attempt starting");

        match inner.run_attempt(&mut session, &control, &events_tx, &mut events_rx).await {
            AttemptOutcome::Succeeded => {
                if !control.settle().await {
                    break Terminal::Canceled;
                }
                let path = inner.finalize(&mut session).await;
                break Terminal::Succeeded {
                    path,
                    elapsed: session.started.elapsed(),
                };
            }
            AttemptOutcome::CacheHit(cached) => {
                if !control.settle().await {
                    break Terminal::Canceled;
                }
                match inner.deliver_cached(&mut session, &cached).await {
                    Ok(path) => {
                        break Terminal::Succeeded {
                            path,
                            elapsed: Duration::ZERO,
                        };
                    }
                    Err(e) => break Terminal::Failed(e),
                }
            }
            AttemptOutcome::Canceled => break Terminal::Canceled,
            AttemptOutcome::Failed(error) => {
                warn!(attempt = session.attempt, error = %error, "attempt failed");
                if error.is_range_not_satisfiable() {
                    info!("range rejected; discarding partial data");
                    inner
                        .coordinator
                        .discard(&session.request.source, &session.working_path)
                        .await;
                    session.bytes_received = 0;
                }

                let fallback_spent = session.fallback_used || session.fallback_considered;
                session.fallback_considered = true;
                let decision = inner
                    .policy
                    .on_attempt_failed(&error, session.attempt, &session.source, fallback_spent)
                    .await;

                match decision {
                    RetryDecision::Retry { delay, attempt } => {
                        session.attempt = attempt;
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = control.token().cancelled() => break Terminal::Canceled,
                        }
                    }
                    RetryDecision::UseFallback { source, attempt } => {
                        session.source = source;
                        session.fallback_used = true;
                        session.attempt = attempt;
                    }
                    RetryDecision::GiveUp { reason } => {
                        error!(reason = %reason, error = %error, "transfer failed");
                        if !control.settle().await {
                            break Terminal::Canceled;
                        }
                        break Terminal::Failed(error);
                    }
                }
            }
        }
    };

    inner.complete(&mut session, terminal, reply).await;
    clear_active(&inner, &control);
    drop(permit);
}

fn clear_active(inner: &Inner, control: &Arc<SessionControl>) {
    let mut active = lock(&inner.active);
    if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, control)) {
        *active = None;
    }
}

impl Inner {
    async fn run_attempt(
        &self,
        session: &mut TransferSession,
        control: &SessionControl,
        events_tx: &mpsc::UnboundedSender<WorkerEvent>,
        events_rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> AttemptOutcome {
        let token = control.token().clone();

        let mut offset = 0;
        if session.resume_enabled {
            let probed = tokio::select! {
                probed = self.transport.probe(&session.source) => probed,
                () = token.cancelled() => return AttemptOutcome::Canceled,
            };
            let meta = match probed {
                Ok(meta) => meta,
                Err(e) => return AttemptOutcome::Failed(e),
            };
            session.meta = meta.clone();

            if let Some(total) = meta.content_length {
                session.set_total(total);
                let candidate = self
                    .coordinator
                    .locate_candidate(&session.request.source, &meta, &session.working_path)
                    .await;
                let plan = self
                    .coordinator
                    .reconcile(
                        &session.request.source,
                        candidate.as_deref(),
                        total,
                        &session.working_path,
                    )
                    .await;
                match plan {
                    Ok(ResumePlan::AlreadyComplete { path }) => return AttemptOutcome::CacheHit(path),
                    Ok(ResumePlan::ResumeFrom { offset: resume_at }) => offset = resume_at,
                    Err(e) => return AttemptOutcome::Failed(e),
                }
                session.owns_working_file = true;
                self.coordinator
                    .record(&session.request.source, &session.working_path, &meta)
                    .await;
            } else {
                warn!("server did not report a length; transferring without resume");
                session.resume_enabled = false;
            }
        }

        if !session.resume_enabled {
            if let Err(e) = create_empty(&session.working_path).await {
                return AttemptOutcome::Failed(e);
            }
            session.owns_working_file = true;
        }
        session.bytes_received = offset;
        self.publish_progress(session);

        let opened = tokio::select! {
            opened = self.transport.open(&session.source, offset) => opened,
            () = token.cancelled() => return AttemptOutcome::Canceled,
        };
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => return AttemptOutcome::Failed(e),
        };

        let start_position = opened.start_offset;
        if start_position != offset {
            warn!(requested = offset, "server ignored range request; restarting from zero");
            session.bytes_received = start_position;
        }
        if session.meta.content_disposition.is_none() {
            session.meta.content_disposition = opened.meta.content_disposition.clone();
        }
        if session.known_total().is_none()
            && let Some(total) = opened.total_length()
        {
            session.set_total(total);
        }

        let destination = match open_at(&session.working_path, start_position).await {
            Ok(file) => file,
            Err(e) => return AttemptOutcome::Failed(e),
        };

        let worker = Arc::new(TransferWorker::new(
            WorkerOptions::from(&self.config),
            events_tx.clone(),
        ));
        if !control.attach_worker(Arc::clone(&worker)).await {
            return AttemptOutcome::Canceled;
        }
        worker.copy(
            opened.body,
            destination,
            CopyTarget {
                url: session.source.to_string(),
                path: session.working_path.clone(),
                start_position,
                expected_total: session.known_total(),
            },
        );

        let mut cancel_forwarded = false;
        loop {
            let event = tokio::select! {
                event = events_rx.recv() => event,
                () = token.cancelled(), if !cancel_forwarded => {
                    cancel_forwarded = true;
                    worker.cancel().await;
                    continue;
                }
            };
            let Some(event) = event else {
                return AttemptOutcome::Canceled;
            };

            if event.worker != worker.id() {
                error!(expected = worker.id(), actual = event.worker, "event from unknown worker");
                control.detach_worker().await;
                worker.cancel().await;
                return AttemptOutcome::Failed(DownloadError::UnexpectedSender {
                    expected: worker.id(),
                    actual: event.worker,
                });
            }

            match event.kind {
                WorkerEventKind::Progress { position } => {
                    if position > session.bytes_received {
                        session.attempt = 1;
                    }
                    session.bytes_received = position;
                    self.publish_progress(session);
                }
                WorkerEventKind::Completed(outcome) => {
                    control.detach_worker().await;
                    return match outcome {
                        WorkerOutcome::Succeeded => AttemptOutcome::Succeeded,
                        WorkerOutcome::Canceled => AttemptOutcome::Canceled,
                        WorkerOutcome::Failed(e) => AttemptOutcome::Failed(e),
                    };
                }
            }
        }
    }

    /// Serves a complete cached copy without touching the network.
    async fn deliver_cached(
        &self,
        session: &mut TransferSession,
        cached: &Path,
    ) -> Result<PathBuf, DownloadError> {
        info!(path = %cached.display(), "serving from cache");
        let path = if session.request.preserve_server_filename || cached == session.request.destination {
            cached.to_path_buf()
        } else {
            let destination = &session.request.destination;
            if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
                ensure_dir(parent).await?;
            }
            tokio::fs::copy(cached, destination)
                .await
                .map_err(|e| DownloadError::io(destination, e))?;
            destination.clone()
        };
        if let Some(total) = session.known_total() {
            session.bytes_received = total;
        }
        self.publish_progress(session);
        Ok(path)
    }

    /// Applies the server filename, updates the cache, and waits for release.
    async fn finalize(&self, session: &mut TransferSession) -> PathBuf {
        let mut final_path = session.working_path.clone();

        if session.request.preserve_server_filename {
            let dir = session.request.destination.clone();
            let name = server_filename(&session.meta, &session.request.source);
            if let Some(name) = name {
                let mut target = dir.join(&name);
                if is_locked(&target).await {
                    let stamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis())
                        .unwrap_or_default();
                    let sibling = sibling_temp_dir(&dir, stamp);
                    warn!(target = %target.display(), sibling = %sibling.display(), "target name is held; using sibling directory");
                    target = sibling.join(&name);
                }
                match move_replace(&session.working_path, &target).await {
                    Ok(()) => final_path = target,
                    Err(e) => warn!(error = %e, "could not apply server filename; keeping working name"),
                }
            } else {
                debug!("no server filename available; keeping working name");
            }
        }

        self.coordinator
            .record(&session.request.source, &final_path, &session.meta)
            .await;
        wait_for_release(
            &final_path,
            self.config.release_wait_timeout,
            self.config.release_poll_interval,
        )
        .await;
        final_path
    }

    /// Emits the single completion notification for the session.
    async fn complete(
        &self,
        session: &mut TransferSession,
        terminal: Terminal,
        reply: oneshot::Sender<CompletionResult>,
    ) {
        let (state, file_path, elapsed, error) = match terminal {
            Terminal::Succeeded { path, elapsed } => {
                info!(path = %path.display(), bytes = session.bytes_received, ?elapsed, "transfer succeeded");
                (CompletionState::Succeeded, Some(path), elapsed, None)
            }
            Terminal::Canceled => {
                if session.owns_working_file {
                    self.coordinator.invalidate(&session.request.source).await;
                    remove_best_effort(&session.working_path).await;
                }
                info!("transfer canceled");
                (CompletionState::Canceled, None, session.started.elapsed(), None)
            }
            Terminal::Failed(e) => {
                let path = session.owns_working_file.then(|| session.working_path.clone());
                (CompletionState::Failed, path, session.started.elapsed(), Some(Arc::new(e)))
            }
        };

        let result = CompletionResult {
            state,
            file_path,
            source: session.request.source.clone(),
            elapsed,
            bytes_total: session.bytes_total,
            bytes_received: session.bytes_received,
            error,
        };
        self.completion_listeners.emit(&result);
        // The caller may have dropped the handle.
        let _ = reply.send(result);
    }

    /// Records the session's counters and notifies observers when progress moved forward.
    fn publish_progress(&self, session: &mut TransferSession) {
        if let Some(total) = session.known_total()
            && session.bytes_received > total
        {
            return;
        }
        let snapshot = session.snapshot();
        *lock(&self.progress) = snapshot;
        if session.bytes_received < session.last_published {
            return;
        }
        session.last_published = session.bytes_received;
        self.progress_listeners.emit(&snapshot);
    }
}

/// Opens `path` for writing positioned at `position`, dropping anything past it.
async fn open_at(path: &Path, position: u64) -> Result<tokio::fs::File, DownloadError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.set_len(position)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.seek(std::io::SeekFrom::Start(position))
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(file)
}
