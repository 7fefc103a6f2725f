//! Resumable Transfer Core Library
//!
//! This library transfers remote files over HTTP(S) with resume, fixed-delay
//! retry, DNS fallback, and an optional cache of previously transferred files.
//!
//! # Architecture
//!
//! Everything lives under [`download`]:
//! - [`download::TransferOrchestrator`] - session lifecycle, retry loop, completion
//! - [`download::TransferWorker`] - background byte copy with progress sampling
//! - [`download::ResumeCoordinator`] - resume offset and cache decisions
//! - [`download::RetryPolicy`] - retry, fallback, and give-up decisions

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use download::{
    CacheStore, CompletionResult, CompletionState, DnsFallback, DownloadError, FailureType,
    HttpClient, HttpTransport, MemoryCache, ProgressSnapshot, RetryDecision, RetryPolicy,
    StartError, StaticFallback, TransferConfig, TransferHandle, TransferOrchestrator,
    classify_error,
};
