//! Background byte-copy engine.
//!
//! A [`TransferWorker`] copies an open response body into an open destination
//! file on a spawned task. It samples progress on a fixed interval (only when
//! the position moved), honors cancellation at read boundaries, and reports
//! exactly one completion. Both streams are released before the completion
//! event is sent and before a pending [`TransferWorker::cancel`] returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::client::BodyReader;
use super::config::TransferConfig;
use super::error::DownloadError;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a worker.
///
/// Moves forward only: `NotStarted → Started → {Canceled | Finished}`. The two
/// terminal states are mutually exclusive; the first transition wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// `copy` has not been called.
    NotStarted = 0,
    /// The copy loop is running.
    Started = 1,
    /// Cancellation won.
    Canceled = 2,
    /// The copy loop ended on its own (success or failure).
    Finished = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::Canceled,
            _ => Self::Finished,
        }
    }

    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Started)
                | (Self::Started, Self::Canceled)
                | (Self::Started, Self::Finished)
        )
    }
}

/// Atomic holder for [`WorkerState`] with a single mutation entry point.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerState::NotStarted as u8))
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves `from → to` if the table allows it and the state is still `from`.
    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        from.can_move_to(to)
            && self
                .0
                .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

/// Terminal result of a copy.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The body ended exactly at the expected total (or the total was unknown).
    Succeeded,
    /// Cancellation won.
    Canceled,
    /// The copy failed.
    Failed(DownloadError),
}

/// What a worker reports.
#[derive(Debug)]
pub enum WorkerEventKind {
    /// Byte position advanced.
    Progress {
        /// Absolute position in the destination file.
        position: u64,
    },
    /// The copy ended; sent exactly once.
    Completed(WorkerOutcome),
}

/// An event tagged with the worker that sent it.
#[derive(Debug)]
pub struct WorkerEvent {
    /// Id of the sending worker.
    pub worker: u64,
    /// Event payload.
    pub kind: WorkerEventKind,
}

/// Where a copy starts and how long it should be.
#[derive(Debug, Clone)]
pub struct CopyTarget {
    /// Address being read, for error context.
    pub url: String,
    /// Destination file path, for error context.
    pub path: PathBuf,
    /// Bytes already present in the destination.
    pub start_position: u64,
    /// Expected final position, when known.
    pub expected_total: Option<u64>,
}

/// Worker tuning, taken from [`TransferConfig`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Copy buffer size.
    pub chunk_size: usize,
    /// Progress sampling interval.
    pub progress_interval: Duration,
    /// Longest a single read may stall.
    pub read_timeout: Duration,
    /// How long `cancel` waits for stream release.
    pub safe_wait_timeout: Duration,
}

impl From<&TransferConfig> for WorkerOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            progress_interval: config.progress_interval,
            read_timeout: config.read_timeout,
            safe_wait_timeout: config.safe_wait_timeout,
        }
    }
}

/// Copies one body into one file on a background task.
#[derive(Debug)]
pub struct TransferWorker {
    id: u64,
    options: WorkerOptions,
    state: Arc<StateCell>,
    position: Arc<AtomicU64>,
    cancel: CancellationToken,
    released_tx: std::sync::Mutex<Option<watch::Sender<bool>>>,
    released_rx: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl TransferWorker {
    /// Creates an idle worker that reports on `events`.
    #[must_use]
    pub fn new(options: WorkerOptions, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        let (released_tx, released_rx) = watch::channel(false);
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            options,
            state: Arc::new(StateCell::new()),
            position: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            released_tx: std::sync::Mutex::new(Some(released_tx)),
            released_rx,
            events,
        }
    }

    /// Unique id carried by every event this worker sends.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Current absolute byte position. Never blocks.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Starts copying `source` into `destination` on a spawned task.
    ///
    /// `destination` must already be positioned at `target.start_position`.
    /// Ignored unless the worker is `NotStarted`.
    #[instrument(skip(self, source, destination, target), fields(worker = self.id, url = %target.url))]
    pub fn copy(&self, source: BodyReader, destination: File, target: CopyTarget) {
        if !self
            .state
            .transition(WorkerState::NotStarted, WorkerState::Started)
        {
            debug!(state = ?self.state(), "copy ignored; worker already used");
            return;
        }
        let Some(released_tx) = self
            .released_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let start_position = target.start_position;
        self.position.store(start_position, Ordering::SeqCst);
        let job = CopyJob {
            id: self.id,
            options: self.options,
            state: Arc::clone(&self.state),
            position: Arc::clone(&self.position),
            cancel: self.cancel.clone(),
            released_tx,
            events: self.events.clone(),
            target,
        };
        tokio::spawn(job.run(source, destination, start_position));
    }

    /// Requests a cooperative stop and waits for the streams to be released.
    ///
    /// Before `copy` the request is latent and honored as soon as the copy
    /// loop starts. Returns false if the safe-wait timeout elapsed first.
    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn cancel(&self) -> bool {
        self.cancel.cancel();
        match self.state() {
            WorkerState::NotStarted => {
                debug!("cancel recorded before start");
                return true;
            }
            WorkerState::Started => {
                self.state
                    .transition(WorkerState::Started, WorkerState::Canceled);
            }
            WorkerState::Canceled | WorkerState::Finished => {}
        }

        let mut released = self.released_rx.clone();
        // A dropped sender means the task is gone and its streams with it.
        let waited = tokio::time::timeout(
            self.options.safe_wait_timeout,
            released.wait_for(|released| *released),
        )
        .await
        .is_ok();
        if !waited {
            warn!(
                timeout = ?self.options.safe_wait_timeout,
                "worker did not release streams in time"
            );
        }
        waited
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Everything the spawned copy task owns.
struct CopyJob {
    id: u64,
    options: WorkerOptions,
    state: Arc<StateCell>,
    position: Arc<AtomicU64>,
    cancel: CancellationToken,
    released_tx: watch::Sender<bool>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    target: CopyTarget,
}

enum LoopEnd {
    EndOfStream,
    Stopped,
}

impl CopyJob {
    async fn run(self, mut source: BodyReader, mut destination: File, start_position: u64) {
        let mut buf = vec![0u8; self.options.chunk_size];
        let mut position = start_position;
        let mut last_reported = start_position;
        let mut ticker =
            tokio::time::interval(self.options.progress_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        let mut read_deadline = Instant::now() + self.options.read_timeout;

        let loop_result: Result<LoopEnd, DownloadError> = loop {
            if self.cancel.is_cancelled() || self.state.get() != WorkerState::Started {
                break Ok(LoopEnd::Stopped);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Ok(LoopEnd::Stopped),
                _ = ticker.tick() => {
                    let current = self.position.load(Ordering::SeqCst);
                    if current > last_reported {
                        last_reported = current;
                        self.send(WorkerEventKind::Progress { position: current });
                    }
                }
                () = tokio::time::sleep_until(read_deadline) => {
                    break Err(DownloadError::timeout(self.target.url.as_str()));
                }
                read = source.read(&mut buf) => match read {
                    Ok(0) => break Ok(LoopEnd::EndOfStream),
                    Ok(n) => {
                        let next = position + n as u64;
                        if let Some(total) = self.target.expected_total
                            && next > total
                        {
                            break Err(DownloadError::incomplete(self.target.url.as_str(), total, next));
                        }
                        if let Err(e) = destination.write_all(&buf[..n]).await {
                            break Err(DownloadError::io(&self.target.path, e));
                        }
                        position = next;
                        self.position.store(position, Ordering::SeqCst);
                        read_deadline = Instant::now() + self.options.read_timeout;
                    }
                    Err(e) => break Err(DownloadError::stream(self.target.url.as_str(), e)),
                },
            }
        };

        // Release both streams before reporting anything terminal.
        let flush_result = destination.flush().await;
        drop(source);
        drop(destination.into_std().await);
        self.released_tx.send_replace(true);

        let outcome = match loop_result {
            Ok(LoopEnd::Stopped) => {
                self.state
                    .transition(WorkerState::Started, WorkerState::Canceled);
                WorkerOutcome::Canceled
            }
            Ok(LoopEnd::EndOfStream) => {
                let failure = match (flush_result, self.target.expected_total) {
                    (Err(e), _) => Some(DownloadError::io(&self.target.path, e)),
                    (Ok(()), Some(total)) if position != total => {
                        Some(DownloadError::incomplete(self.target.url.as_str(), total, position))
                    }
                    (Ok(()), _) => None,
                };
                self.finish(failure)
            }
            Err(error) => self.finish(Some(error)),
        };

        // Bytes written since the last tick are reported for every outcome.
        let final_position = self
            .target
            .expected_total
            .map_or(position, |total| position.min(total));
        if final_position > last_reported || matches!(outcome, WorkerOutcome::Succeeded) {
            self.send(WorkerEventKind::Progress {
                position: final_position,
            });
        }
        debug!(worker = self.id, position, outcome = ?outcome, "copy finished");
        self.send(WorkerEventKind::Completed(outcome));
    }

    /// Claims the `Finished` state; a concurrent cancel that got there first wins.
    fn finish(&self, failure: Option<DownloadError>) -> WorkerOutcome {
        if !self
            .state
            .transition(WorkerState::Started, WorkerState::Finished)
        {
            return WorkerOutcome::Canceled;
        }
        match failure {
            None => WorkerOutcome::Succeeded,
            Some(error) => WorkerOutcome::Failed(error),
        }
    }

    fn send(&self, kind: WorkerEventKind) {
        // The receiver may be gone if the session was torn down.
        let _ = self.events.send(WorkerEvent {
            worker: self.id,
            kind,
        });
    }
}
