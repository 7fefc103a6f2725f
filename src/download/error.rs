//! Error types for the download module.
//!
//! This module defines structured errors for all transfer operations,
//! providing context-rich error messages for debugging and user feedback.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while transferring a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The host name of the source address could not be resolved.
    #[error("could not resolve host for {url}")]
    NameResolution {
        /// The URL whose host failed to resolve.
        url: String,
    },

    /// Request or read timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Reading the response body failed mid-stream.
    #[error("stream error downloading {url}: {source}")]
    Stream {
        /// The URL being read.
        url: String,
        /// The underlying read error.
        #[source]
        source: std::io::Error,
    },

    /// The body ended (or overran) at a byte position other than the expected total.
    #[error("incomplete stream for {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Incomplete {
        /// The URL being read.
        url: String,
        /// Expected total size in bytes.
        expected_bytes: u64,
        /// Byte position when the stream stopped.
        actual_bytes: u64,
    },

    /// File system error (create, write, rename, delete).
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or cannot carry a substitute host.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A worker event arrived from a worker the session does not own.
    #[error("event from transfer worker {actual} while worker {expected} owns the session")]
    UnexpectedSender {
        /// Worker id the session currently owns.
        expected: u64,
        /// Worker id that sent the event.
        actual: u64,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a name-resolution error.
    pub fn name_resolution(url: impl Into<String>) -> Self {
        Self::NameResolution { url: url.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a mid-stream read error.
    pub fn stream(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Stream {
            url: url.into(),
            source,
        }
    }

    /// Creates an incomplete-stream error.
    pub fn incomplete(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Incomplete {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true when the server rejected the requested byte range (HTTP 416).
    #[must_use]
    pub fn is_range_not_satisfiable(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 416, .. })
    }
}

/// Errors surfaced synchronously by `start()`.
#[derive(Debug, Error)]
pub enum StartError {
    /// A previous transfer did not reach a terminal state within the safe-wait timeout.
    #[error("a transfer is already in flight; gave up waiting after {waited:?}")]
    ConcurrentStartRejected {
        /// How long the caller waited for the gate.
        waited: Duration,
    },
}
