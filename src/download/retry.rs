//! Retry and DNS-fallback policy for failed transfer attempts.
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::NameResolution`] - The host did not resolve; eligible for a
//!   fallback address on the first attempt, otherwise retried like a transient failure
//! - [`FailureType::Permanent`] - Internal faults where another attempt cannot help
//!
//! The [`RetryPolicy`] then decides between a delayed retry, an immediate retry
//! against a fallback address, or giving up.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use transfer_core::download::{DownloadError, RetryDecision, RetryPolicy};
//! use url::Url;
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(3, Duration::from_secs(3));
//! let source = Url::parse("https://example.com/file.iso").unwrap();
//! let error = DownloadError::http_status(source.as_str(), 503);
//!
//! match policy.on_attempt_failed(&error, 1, &source, false).await {
//!     RetryDecision::Retry { delay, attempt } => println!("retry #{attempt} in {delay:?}"),
//!     RetryDecision::UseFallback { source, .. } => println!("switching to {source}"),
//!     RetryDecision::GiveUp { reason } => println!("giving up: {reason}"),
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use url::Url;

use super::DownloadError;
use super::constants::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeouts, connection resets, any HTTP error status,
    /// incomplete streams.
    Transient,

    /// The source host could not be resolved.
    NameResolution,

    /// Internal fault that another attempt cannot fix.
    ///
    /// Only an event from an unexpected worker falls here.
    Permanent,
}

/// Decision on how to continue after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Retry immediately against a substitute address.
    UseFallback {
        /// Address to use for this and all subsequent attempts.
        source: Url,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Stop and surface the failure.
    GiveUp {
        /// Human-readable reason why no retry is attempted.
        reason: String,
    },
}

/// DNS fallback capability: maps a source address to a substitute one.
#[async_trait]
pub trait DnsFallback: Send + Sync + Debug {
    /// Substitute address for `source`, or `None` if there is none.
    async fn resolve(&self, source: &Url) -> Option<Url>;
}

/// [`DnsFallback`] backed by a fixed host → substitute host table.
///
/// Scheme, port, path, and query of the source are kept.
#[derive(Debug, Clone, Default)]
pub struct StaticFallback {
    hosts: HashMap<String, String>,
}

impl StaticFallback {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a substitute (host name or IP literal) for `host`.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, substitute: impl Into<String>) -> Self {
        self.hosts
            .insert(host.into().to_ascii_lowercase(), substitute.into());
        self
    }
}

#[async_trait]
impl DnsFallback for StaticFallback {
    async fn resolve(&self, source: &Url) -> Option<Url> {
        let host = source.host_str()?.to_ascii_lowercase();
        let substitute = self.hosts.get(&host)?;
        let mut url = source.clone();
        url.set_host(Some(substitute)).ok()?;
        Some(url)
    }
}

/// Retry policy with a fixed delay between attempts and optional DNS fallback.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay before each regular retry.
    delay: Duration,

    /// Resolver consulted on a first-attempt name-resolution failure.
    fallback: Option<Arc<dyn DnsFallback>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            fallback: None,
        }
    }

    /// Attaches a DNS fallback resolver.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn DnsFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decides how to continue after attempt `attempt` (1-indexed) failed.
    ///
    /// A name-resolution failure on attempt 1 asks the fallback resolver for a
    /// substitute address once per session (`fallback_used` guards repeats).
    #[instrument(skip(self, error), fields(max_attempts = self.max_attempts, error = %error))]
    pub async fn on_attempt_failed(
        &self,
        error: &DownloadError,
        attempt: u32,
        source: &Url,
        fallback_used: bool,
    ) -> RetryDecision {
        let failure_type = classify_error(error);

        if failure_type == FailureType::NameResolution
            && attempt == 1
            && !fallback_used
            && let Some(fallback) = &self.fallback
        {
            if let Some(substitute) = fallback.resolve(source).await {
                info!(original = %source, fallback = %substitute, "switching to fallback address");
                return RetryDecision::UseFallback {
                    source: substitute,
                    attempt: attempt + 1,
                };
            }
            debug!("fallback resolver returned no substitute");
        }

        if failure_type == FailureType::Permanent {
            return RetryDecision::GiveUp {
                reason: "internal fault - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::GiveUp {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = self.delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay: self.delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a transfer error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP status (any) | Transient |
/// | Timeout, Network, Stream, Incomplete | Transient |
/// | NameResolution | NameResolution |
/// | Io, InvalidUrl | Transient |
/// | UnexpectedSender | Permanent |
///
/// Every failure except an internal fault is retried until the attempt cap.
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::NameResolution { .. } => FailureType::NameResolution,
        DownloadError::HttpStatus { .. }
        | DownloadError::Network { .. }
        | DownloadError::Timeout { .. }
        | DownloadError::Stream { .. }
        | DownloadError::Incomplete { .. }
        | DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. } => FailureType::Transient,
        DownloadError::UnexpectedSender { .. } => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn source() -> Url {
        Url::parse("https://primary.example.com:8443/files/a.iso?x=1").unwrap()
    }

    fn fallback_policy() -> RetryPolicy {
        let fallback = StaticFallback::new().with_host("primary.example.com", "10.0.0.7");
        RetryPolicy::new(5, Duration::from_secs(3)).with_fallback(Arc::new(fallback))
    }

    // ==================== Classification ====================

    #[test]
    fn test_classify_http_statuses() {
        let url = "http://example.com";
        let cases = [
            (400, FailureType::Transient),
            (403, FailureType::Transient),
            (404, FailureType::Transient),
            (408, FailureType::Transient),
            (416, FailureType::Transient),
            (429, FailureType::Transient),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = DownloadError::http_status(url, status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_incomplete_is_transient() {
        let error = DownloadError::incomplete("http://example.com", 10, 5);
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_name_resolution() {
        let error = DownloadError::name_resolution("http://example.com");
        assert_eq!(classify_error(&error), FailureType::NameResolution);
    }

    #[test]
    fn test_classify_unexpected_sender_is_permanent() {
        let error = DownloadError::UnexpectedSender {
            expected: 2,
            actual: 1,
        };
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    // ==================== Decisions ====================

    #[tokio::test]
    async fn test_transient_failure_retries_with_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3));
        let error = DownloadError::timeout("http://example.com");

        let decision = policy.on_attempt_failed(&error, 1, &source(), false).await;
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(3),
                attempt: 2
            }
        );
    }

    #[tokio::test]
    async fn test_gives_up_at_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3));
        let error = DownloadError::timeout("http://example.com");

        let decision = policy.on_attempt_failed(&error, 3, &source(), false).await;
        match decision {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("exhausted")),
            other => panic!("expected GiveUp, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_error_status_is_retried_until_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let error = DownloadError::http_status("http://example.com", 404);

        let decision = policy.on_attempt_failed(&error, 1, &source(), false).await;
        assert!(matches!(decision, RetryDecision::Retry { attempt: 2, .. }));

        let decision = policy.on_attempt_failed(&error, 3, &source(), false).await;
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[tokio::test]
    async fn test_unexpected_sender_gives_up_immediately() {
        let policy = RetryPolicy::default();
        let error = DownloadError::UnexpectedSender {
            expected: 2,
            actual: 1,
        };
        let decision = policy.on_attempt_failed(&error, 1, &source(), false).await;
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[tokio::test]
    async fn test_name_resolution_on_first_attempt_uses_fallback() {
        let policy = fallback_policy();
        let error = DownloadError::name_resolution(source().as_str());

        let decision = policy.on_attempt_failed(&error, 1, &source(), false).await;
        match decision {
            RetryDecision::UseFallback { source, attempt } => {
                assert_eq!(attempt, 2);
                assert_eq!(source.as_str(), "https://10.0.0.7:8443/files/a.iso?x=1");
            }
            other => panic!("expected UseFallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_name_resolution_after_first_attempt_is_regular_retry() {
        let policy = fallback_policy();
        let error = DownloadError::name_resolution(source().as_str());

        let decision = policy.on_attempt_failed(&error, 2, &source(), false).await;
        assert!(matches!(decision, RetryDecision::Retry { attempt: 3, .. }));
    }

    #[tokio::test]
    async fn test_fallback_not_repeated_once_used() {
        let policy = fallback_policy();
        let error = DownloadError::name_resolution(source().as_str());

        let decision = policy.on_attempt_failed(&error, 1, &source(), true).await;
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[tokio::test]
    async fn test_name_resolution_without_resolver_is_regular_retry() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let error = DownloadError::name_resolution(source().as_str());
        let decision = policy.on_attempt_failed(&error, 1, &source(), false).await;
        assert!(matches!(decision, RetryDecision::Retry { attempt: 2, .. }));
    }

    #[tokio::test]
    async fn test_static_fallback_unknown_host_is_none() {
        let fallback = StaticFallback::new().with_host("other.example.com", "10.0.0.1");
        assert_eq!(fallback.resolve(&source()).await, None);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
