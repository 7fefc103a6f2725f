//! Resumable, retrying HTTP file transfer.
//!
//! This module transfers a single remote resource to a local file, surviving
//! flaky connections by resuming from partial data and retrying with a fixed
//! delay.
//!
//! # Features
//!
//! - Byte-range resume from partial files and cache records
//! - Fixed-delay retry with a per-session attempt cap
//! - One-shot DNS fallback to a substitute address
//! - Server-provided filenames (Content-Disposition or URL path)
//! - Sampled progress and a single completion notification per session
//! - Idempotent, cooperative cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use transfer_core::download::{HttpClient, TransferConfig, TransferOrchestrator};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransferConfig::default();
//! let client = Arc::new(HttpClient::new(&config)?);
//! let orchestrator = TransferOrchestrator::new(client, config);
//!
//! let mut progress = orchestrator.subscribe_progress();
//! let handle = orchestrator
//!     .start(Url::parse("https://example.com/disk.img")?, "./disk.img", false)
//!     .await?;
//! tokio::spawn(async move {
//!     while let Some(snapshot) = progress.recv().await {
//!         println!("{}%", snapshot.percentage);
//!     }
//! });
//! let result = handle.wait().await;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod config;
pub mod constants;
mod error;
mod filename;
mod fs;
mod orchestrator;
mod progress;
mod resume;
mod retry;
mod session;
mod worker;

pub use cache::{CacheRecord, CacheStore, MemoryCache};
pub use client::{BodyReader, HttpClient, HttpTransport, OpenedStream, ResponseMeta};
pub use config::TransferConfig;
pub use error::{DownloadError, StartError};
pub use orchestrator::{OrchestratorBuilder, TransferHandle, TransferOrchestrator};
pub use progress::{CompletionResult, CompletionState, ProgressSnapshot};
pub use resume::{ResumeCoordinator, ResumePlan};
pub use retry::{
    DnsFallback, FailureType, RetryDecision, RetryPolicy, StaticFallback, classify_error,
};
pub use session::TransferRequest;
pub use worker::{
    CopyTarget, TransferWorker, WorkerEvent, WorkerEventKind, WorkerOptions, WorkerOutcome,
    WorkerState,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
