//! Cache capability: source address → previously transferred local file.
//!
//! The orchestrator treats the store as an external collaborator. Stores keep
//! at most one live record per source address; adding a record replaces the
//! prior one. [`MemoryCache`] is a process-local implementation that can be
//! shared by several orchestrators.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use url::Url;

use super::client::ResponseMeta;

/// A cached association between a source address and a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// Source address the record is keyed by.
    pub source: Url,
    /// Local file holding (possibly partial) data for the source.
    pub path: PathBuf,
    /// Response metadata captured when the record was written.
    pub meta: ResponseMeta,
}

/// Persistent or in-memory URI → file mapping.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Path recorded for `source`, if any.
    async fn get(&self, source: &Url, meta: &ResponseMeta) -> Option<PathBuf>;

    /// Upserts the record for `source`.
    async fn add(&self, source: &Url, path: &Path, meta: &ResponseMeta);

    /// Removes any record for `source`. Idempotent.
    async fn invalidate(&self, source: &Url);
}

/// Concurrent in-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: DashMap<String, CacheRecord>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full record for `source`, if present.
    #[must_use]
    pub fn record(&self, source: &Url) -> Option<CacheRecord> {
        self.records.get(source.as_str()).map(|r| r.value().clone())
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, source: &Url, _meta: &ResponseMeta) -> Option<PathBuf> {
        self.records
            .get(source.as_str())
            .map(|record| record.path.clone())
    }

    async fn add(&self, source: &Url, path: &Path, meta: &ResponseMeta) {
        debug!(source = %source, path = %path.display(), "cache record upserted");
        self.records.insert(
            source.as_str().to_string(),
            CacheRecord {
                source: source.clone(),
                path: path.to_path_buf(),
                meta: meta.clone(),
            },
        );
    }

    async fn invalidate(&self, source: &Url) {
        if self.records.remove(source.as_str()).is_some() {
            debug!(source = %source, "cache record invalidated");
        }
    }
}
