//! Resume and cache decisions for a transfer attempt.
//!
//! Given the probed total size, the [`ResumeCoordinator`] picks the best local
//! candidate (cache hit, partial file from an earlier attempt, or nothing) and
//! aligns the working file so the transfer can continue from its size.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use url::Url;

use super::cache::CacheStore;
use super::client::ResponseMeta;
use super::error::DownloadError;
use super::fs::{create_empty, file_size, move_replace, remove_best_effort};

/// Outcome of [`ResumeCoordinator::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePlan {
    /// The candidate already holds the full resource; serve it without a network round-trip.
    AlreadyComplete {
        /// File holding the complete resource.
        path: PathBuf,
    },
    /// The working file holds exactly `offset` bytes; request the rest.
    ResumeFrom {
        /// Byte offset to resume from.
        offset: u64,
    },
}

/// Decides resume vs. restart vs. cache hit, and keeps cache records current.
#[derive(Debug, Clone, Default)]
pub struct ResumeCoordinator {
    cache: Option<Arc<dyn CacheStore>>,
}

impl ResumeCoordinator {
    /// Creates a coordinator; `None` disables caching and resume.
    #[must_use]
    pub fn new(cache: Option<Arc<dyn CacheStore>>) -> Self {
        Self { cache }
    }

    /// Returns true when a cache store is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Best local candidate for `source`.
    ///
    /// With caching disabled this is always `working`; otherwise it is the
    /// recorded path, or `None` when the source has no record.
    pub async fn locate_candidate(
        &self,
        source: &Url,
        meta: &ResponseMeta,
        working: &Path,
    ) -> Option<PathBuf> {
        match &self.cache {
            None => Some(working.to_path_buf()),
            Some(cache) => cache.get(source, meta).await,
        }
    }

    /// Compares the candidate's size with `expected_total` and aligns `working`.
    ///
    /// An oversized candidate invalidates the cache record but is still used
    /// as the resume base; a resource-version mismatch then surfaces as a
    /// range rejection from the server.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] if the working file cannot be moved into
    /// place or created.
    #[instrument(skip(self, candidate, working), fields(source = %source))]
    pub async fn reconcile(
        &self,
        source: &Url,
        candidate: Option<&Path>,
        expected_total: u64,
        working: &Path,
    ) -> Result<ResumePlan, DownloadError> {
        let candidate_size = match candidate {
            Some(path) => file_size(path).await,
            None => None,
        };

        if let Some(size) = candidate_size
            && size > expected_total
        {
            warn!(size, expected_total, "cached data larger than resource; invalidating");
            self.invalidate(source).await;
        }

        match (candidate, candidate_size) {
            (Some(path), Some(size)) if size == expected_total => {
                info!(path = %path.display(), size, "candidate already complete");
                Ok(ResumePlan::AlreadyComplete {
                    path: path.to_path_buf(),
                })
            }
            (Some(path), Some(size)) => {
                move_replace(path, working).await?;
                debug!(offset = size, working = %working.display(), "resuming from candidate");
                Ok(ResumePlan::ResumeFrom { offset: size })
            }
            _ => {
                create_empty(working).await?;
                debug!(working = %working.display(), "no usable candidate; starting empty");
                Ok(ResumePlan::ResumeFrom { offset: 0 })
            }
        }
    }

    /// Upserts the cache record for `source`. No-op with caching disabled.
    pub async fn record(&self, source: &Url, path: &Path, meta: &ResponseMeta) {
        if let Some(cache) = &self.cache {
            cache.add(source, path, meta).await;
        }
    }

    /// Removes any cache record for `source`. Idempotent.
    pub async fn invalidate(&self, source: &Url) {
        if let Some(cache) = &self.cache {
            cache.invalidate(source).await;
        }
    }

    /// Drops both the record and the working file so the next attempt starts clean.
    pub async fn discard(&self, source: &Url, working: &Path) {
        self.invalidate(source).await;
        remove_best_effort(working).await;
    }
}
