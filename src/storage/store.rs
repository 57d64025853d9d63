//! The live lookup index.
//!
//! Every update builds a complete replacement snapshot off to the side and
//! publishes it with a single atomic swap. Readers load one snapshot guard
//! for the whole lookup, so a lookup observes either the old index or the
//! new one in full, never a mix of substructures.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::blocking::{BlockingResult, BlockingRule, BlockingType};
use crate::error::CheckError;
use crate::registry_data::Registry;
use crate::storage::bloom::BloomFilter;
use crate::storage::radix::RadixTree;

/// Bloom capacity of a store that has not seen an update yet.
const INITIAL_BLOOM_CAPACITY: u64 = 1_000_000;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// One consistent index version.
struct IndexSnapshot {
    /// Exact canonical-domain rules (also carries SNI rules).
    domains: FxHashMap<String, Arc<BlockingRule>>,
    /// Wildcard rules keyed by base domain.
    wildcards: RadixTree<Arc<BlockingRule>>,
    /// Exact canonical-IP rules.
    ips: FxHashMap<String, Arc<BlockingRule>>,
    /// URL-path rules grouped by their host component.
    url_rules: FxHashMap<String, Vec<Arc<BlockingRule>>>,
    /// Prefilter seeded with every key of the four structures above.
    bloom: BloomFilter,
    last_update: DateTime<Utc>,
    version: String,
}

impl IndexSnapshot {
    fn empty() -> Self {
        Self {
            domains: FxHashMap::default(),
            wildcards: RadixTree::new(),
            ips: FxHashMap::default(),
            url_rules: FxHashMap::default(),
            bloom: BloomFilter::new(INITIAL_BLOOM_CAPACITY, BLOOM_FALSE_POSITIVE_RATE),
            last_update: Utc::now(),
            version: String::new(),
        }
    }

    /// Fast-path gate. Wildcard rules are bloom-seeded under their base
    /// domain, so the key's proper dot-suffixes must be probed too; a miss on
    /// every probe proves no rule family can match.
    fn may_contain(&self, key: &str) -> bool {
        if self.bloom.contains(key) {
            return true;
        }
        for (idx, _) in key.match_indices('.') {
            if self.bloom.contains(&key[idx + 1..]) {
                return true;
            }
        }
        false
    }
}

/// Aggregate counters for the stats surface.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_entries: i64,
    pub domain_entries: i64,
    pub wildcard_entries: i64,
    pub ip_entries: i64,
    pub url_patterns: i64,
    pub last_update: DateTime<Utc>,
    pub version: String,
    pub bloom_filter_size: u64,
}

/// In-memory registry index with hot snapshot swapping.
pub struct MemoryStore {
    snapshot: ArcSwap<IndexSnapshot>,
    /// Published separately so stats readers never touch the snapshot.
    entry_count: AtomicI64,
    /// Hard cap on ingested entries per update; `0` means unlimited.
    max_registry_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_registry_size(0)
    }

    pub fn with_max_registry_size(max_registry_size: usize) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(IndexSnapshot::empty()),
            entry_count: AtomicI64::new(0),
            max_registry_size,
        }
    }

    /// Classifies a canonical key against the current snapshot.
    ///
    /// Lookup order: bloom prefilter, exact domains, exact IPs, wildcard
    /// suffixes, then URL-path rules. URL-path rules match on the host
    /// component only; the key shape carries no path.
    pub fn is_blocked(&self, normalized_url: &str) -> BlockingResult {
        if normalized_url.is_empty() {
            return BlockingResult::new(false, normalized_url, None);
        }

        let snapshot = self.snapshot.load();

        if !snapshot.may_contain(normalized_url) {
            return BlockingResult::new(false, normalized_url, None);
        }

        if let Some(rule) = snapshot.domains.get(normalized_url) {
            return BlockingResult::new(true, normalized_url, Some(rule.clone()));
        }

        if let Some(rule) = snapshot.ips.get(normalized_url) {
            return BlockingResult::new(true, normalized_url, Some(rule.clone()));
        }

        if let Some(rule) = snapshot.wildcards.matches_wildcard(normalized_url) {
            return BlockingResult::new(true, normalized_url, Some(rule.clone()));
        }

        if let Some(rules) = snapshot.url_rules.get(normalized_url) {
            if let Some(rule) = rules.first() {
                return BlockingResult::new(true, normalized_url, Some(rule.clone()));
            }
        }

        BlockingResult::new(false, normalized_url, None)
    }

    /// Rebuilds the index from `registry` and swaps it in atomically.
    ///
    /// Malformed entries are skipped and counted; upstream dumps routinely
    /// contain rows that cannot become rules, and a best-effort refresh beats
    /// an all-or-nothing one.
    pub fn update(&self, registry: &Registry) -> Result<(), CheckError> {
        let ingested = if self.max_registry_size > 0 {
            registry.entries.len().min(self.max_registry_size)
        } else {
            registry.entries.len()
        };
        if ingested < registry.entries.len() {
            warn!(
                cap = self.max_registry_size,
                dropped = registry.entries.len() - ingested,
                "registry exceeds size cap, discarding excess entries"
            );
        }

        let mut next = IndexSnapshot {
            domains: FxHashMap::default(),
            wildcards: RadixTree::new(),
            ips: FxHashMap::default(),
            url_rules: FxHashMap::default(),
            bloom: BloomFilter::new(ingested as u64, BLOOM_FALSE_POSITIVE_RATE),
            last_update: Utc::now(),
            version: registry.version.clone(),
        };

        let mut skipped = 0usize;
        for entry in registry.entries.iter().take(ingested) {
            let rule = match entry.to_rule() {
                Ok(rule) => Arc::new(rule),
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            match entry.entry_type {
                BlockingType::Domain | BlockingType::Sni => {
                    next.bloom.add(&entry.domain);
                    next.domains.insert(entry.domain.clone(), rule);
                }
                BlockingType::Wildcard => {
                    let base = entry.domain.strip_prefix("*.").unwrap_or(&entry.domain);
                    next.bloom.add(base);
                    next.wildcards.insert(base, rule);
                }
                BlockingType::Ip => {
                    next.bloom.add(&entry.ip);
                    next.ips.insert(entry.ip.clone(), rule);
                }
                BlockingType::UrlPath => {
                    // Keyed (and bloom-seeded) by host only; see `is_blocked`.
                    match host_of(&entry.url) {
                        Some(host) => {
                            next.bloom.add(&host);
                            next.url_rules.entry(host).or_default().push(rule);
                        }
                        None => skipped += 1,
                    }
                }
            }
        }

        if skipped > 0 {
            warn!(skipped, total = ingested, "skipped malformed registry entries");
        }

        self.snapshot.store(Arc::new(next));
        self.entry_count.store(ingested as i64, Ordering::SeqCst);

        info!(
            entries = ingested,
            skipped,
            version = %registry.version,
            "index snapshot replaced"
        );

        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let snapshot = self.snapshot.load();
        StoreStats {
            total_entries: self.entry_count.load(Ordering::SeqCst),
            domain_entries: snapshot.domains.len() as i64,
            wildcard_entries: snapshot.wildcards.size() as i64,
            ip_entries: snapshot.ips.len() as i64,
            url_patterns: snapshot.url_rules.len() as i64,
            last_update: snapshot.last_update,
            version: snapshot.version.clone(),
            bloom_filter_size: snapshot.bloom.size(),
        }
    }

    /// Number of entries behind the live snapshot.
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::SeqCst).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the live snapshot with an empty one.
    pub fn clear(&self) {
        self.snapshot.store(Arc::new(IndexSnapshot::empty()));
        self.entry_count.store(0, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the host component of a URL-path pattern.
fn host_of(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    url::Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
