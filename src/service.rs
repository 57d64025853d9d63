//! Lookup facade: normalization and index lookup behind one `check` call.

use std::sync::Arc;

use crate::blocking::BlockingResult;
use crate::error::CheckError;
use crate::normalizer::UrlNormalizer;
use crate::registry_data::Registry;
use crate::storage::store::MemoryStore;

/// Stats surface with render-ready timestamps.
#[derive(Debug, Clone)]
pub struct CheckerStats {
    pub total_entries: i64,
    pub domain_entries: i64,
    pub wildcard_entries: i64,
    pub ip_entries: i64,
    pub url_patterns: i64,
    /// RFC 3339.
    pub last_update: String,
    pub version: String,
    pub bloom_filter_size: u64,
}

/// The single entry point request handlers use: raw URL in, verdict out.
#[derive(Clone)]
pub struct Checker {
    normalizer: UrlNormalizer,
    store: Arc<MemoryStore>,
}

impl Checker {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            normalizer: UrlNormalizer::new(),
            store,
        }
    }

    /// Normalizes `raw_url` and classifies it against the live index.
    ///
    /// Normalization errors surface to the caller; a key the index does not
    /// know is a successful "not blocked" result, never an error.
    pub fn check(&self, raw_url: &str) -> Result<BlockingResult, CheckError> {
        let normalized = self.normalizer.normalize(raw_url)?;
        Ok(self.store.is_blocked(&normalized))
    }

    pub fn stats(&self) -> CheckerStats {
        let stats = self.store.stats();
        CheckerStats {
            total_entries: stats.total_entries,
            domain_entries: stats.domain_entries,
            wildcard_entries: stats.wildcard_entries,
            ip_entries: stats.ip_entries,
            url_patterns: stats.url_patterns,
            last_update: stats.last_update.to_rfc3339(),
            version: stats.version,
            bloom_filter_size: stats.bloom_filter_size,
        }
    }

    pub fn update(&self, registry: &Registry) -> Result<(), CheckError> {
        self.store.update(registry)
    }

    pub fn clear(&self) {
        self.store.clear()
    }
}
