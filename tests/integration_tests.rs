//! End-to-end scenarios: registry in, lookup verdict out, plus scheduler and
//! failover behavior with mock sources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use zapret_check::blocking::BlockingType;
use zapret_check::error::SourceError;
use zapret_check::fetch::{RegistryClient, Source};
use zapret_check::registry_data::{Registry, RegistryEntry};
use zapret_check::service::Checker;
use zapret_check::storage::MemoryStore;
use zapret_check::updater::{Scheduler, SchedulerConfig};

fn checker_with(entries: Vec<(BlockingType, &str)>) -> Checker {
    let checker = Checker::new(Arc::new(MemoryStore::new()));
    let mut registry = Registry::new();
    for (entry_type, value) in entries {
        registry
            .add_entry(RegistryEntry::new(entry_type, value).unwrap())
            .unwrap();
    }
    checker.update(&registry).unwrap();
    checker
}

#[test]
fn blocked_domain_with_scheme_port_and_case() {
    let checker = checker_with(vec![(BlockingType::Domain, "blocked.com")]);

    let result = checker.check("https://BLOCKED.com:443/x").unwrap();
    assert!(result.is_blocked);
    assert_eq!(result.reason, Some(BlockingType::Domain));
    assert_eq!(result.reason_str(), "domain");
    assert_eq!(result.normalized_url, "blocked.com");
}

#[test]
fn wildcard_covers_subdomains() {
    let checker = checker_with(vec![(BlockingType::Wildcard, "*.wildcard.com")]);

    let result = checker.check("https://sub.wildcard.com").unwrap();
    assert!(result.is_blocked);
    assert_eq!(result.reason, Some(BlockingType::Wildcard));
}

#[test]
fn wildcard_does_not_cover_its_base() {
    let checker = checker_with(vec![(BlockingType::Wildcard, "*.wildcard.com")]);

    // The base itself would need a Domain rule.
    let result = checker.check("https://wildcard.com").unwrap();
    assert!(!result.is_blocked);
}

#[test]
fn blocked_ip_with_port() {
    let checker = checker_with(vec![(BlockingType::Ip, "192.168.1.100")]);

    let result = checker.check("http://192.168.1.100:8080").unwrap();
    assert!(result.is_blocked);
    assert_eq!(result.reason, Some(BlockingType::Ip));
    assert_eq!(result.normalized_url, "192.168.1.100");
}

#[test]
fn unrelated_domain_is_not_blocked() {
    let checker = checker_with(vec![(BlockingType::Domain, "blocked.com")]);

    let result = checker.check("https://safe.com").unwrap();
    assert!(!result.is_blocked);
    assert!(result.rule.is_none());
}

#[test]
fn idn_queries_hit_punycode_rules() {
    // The registry stores the Punycode form; the Unicode query must land on
    // the same canonical key.
    let checker = checker_with(vec![(BlockingType::Domain, "xn--e1aybc.xn--p1ai")]);

    let result = checker.check("https://тест.рф").unwrap();
    assert!(result.is_blocked);
    assert_eq!(result.normalized_url, "xn--e1aybc.xn--p1ai");
}

#[test]
fn lookup_results_match_registry_rules_exactly() {
    let checker = checker_with(vec![
        (BlockingType::Domain, "exact.com"),
        (BlockingType::Wildcard, "*.tree.com"),
        (BlockingType::Ip, "10.1.2.3"),
    ]);

    for (query, expect_blocked) in [
        ("exact.com", true),
        ("sub.exact.com", false),
        ("a.tree.com", true),
        ("deep.a.tree.com", true),
        ("tree.com", false),
        ("10.1.2.3", true),
        ("10.1.2.4", false),
    ] {
        let result = checker.check(query).unwrap();
        assert_eq!(
            result.is_blocked, expect_blocked,
            "query {query} expected blocked={expect_blocked}"
        );
    }
}

// --- Scheduler against a mock fetch pipeline ---

struct CountingSource {
    name: String,
    payload: Option<Vec<u8>>,
    fetch_calls: AtomicU32,
}

impl CountingSource {
    fn serving(name: &str, payload: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            payload: Some(payload.to_vec()),
            fetch_calls: AtomicU32::new(0),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            payload: None,
            fetch_calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for CountingSource {
    async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match &self.payload {
            Some(data) => Ok(data.clone()),
            None => Err(SourceError::new(self.name.clone(), "fetch", "HTTP 500")),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

const ONE_ENTRY_CSV: &[u8] = b"id;url;date\n1;blocked.example.com;2024-01-01\n";

#[tokio::test]
async fn scheduler_updates_store_on_interval() {
    let source = CountingSource::serving("Mock Mirror", ONE_ENTRY_CSV);
    let client =
        Arc::new(RegistryClient::new(vec![source as Arc<dyn Source>], Duration::from_secs(5)).unwrap());
    let store = Arc::new(MemoryStore::new());

    let scheduler = Scheduler::new(
        client,
        store.clone(),
        SchedulerConfig {
            interval: Duration::from_millis(50),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            update_timeout: Duration::from_secs(5),
        },
    );

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await.unwrap();

    let status = scheduler.status();
    assert!(
        status.successful_updates >= 2,
        "expected at least two updates, got {}",
        status.successful_updates
    );
    assert!(status.successful_updates <= status.total_updates);
    assert!(scheduler.is_healthy());
    assert_eq!(status.registry_size, 1);
    assert!(store.is_blocked("blocked.example.com").is_blocked);
}

#[tokio::test]
async fn failover_prefers_the_source_that_worked() {
    let broken = CountingSource::failing("Broken Mirror");
    let working = CountingSource::serving("Working Mirror", ONE_ENTRY_CSV);

    let client = RegistryClient::new(
        vec![broken.clone() as Arc<dyn Source>, working.clone()],
        Duration::from_secs(5),
    )
    .unwrap();

    let registry = client.fetch_registry().await.unwrap();
    assert_eq!(registry.source, "Working Mirror");
    assert_eq!(registry.len(), 1);
    assert_eq!(
        client.last_successful_source().as_deref(),
        Some("Working Mirror")
    );

    // Sticky-first ordering: the next round starts with the known-good
    // source and never reaches the broken one.
    client.fetch_registry().await.unwrap();
    assert_eq!(broken.calls(), 1);
    assert_eq!(working.calls(), 2);
}

#[tokio::test]
async fn stale_index_survives_source_outage() {
    let source = CountingSource::serving("Mock Mirror", ONE_ENTRY_CSV);
    let client =
        Arc::new(RegistryClient::new(vec![source as Arc<dyn Source>], Duration::from_secs(5)).unwrap());
    let store = Arc::new(MemoryStore::new());

    let scheduler = Scheduler::new(
        client,
        store.clone(),
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            update_timeout: Duration::from_secs(5),
        },
    );

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await.unwrap();

    // The loaded snapshot keeps serving after the updater is gone.
    let checker = Checker::new(store);
    assert!(checker.check("blocked.example.com").unwrap().is_blocked);
    assert!(!checker.check("safe.example.org").unwrap().is_blocked);
}

#[tokio::test]
async fn concurrent_lookups_during_updates_stay_consistent() {
    let store = Arc::new(MemoryStore::new());

    // Generation A blocks the host with an exact rule, generation B with a
    // wildcard over its parent. A lookup must resolve against exactly one
    // generation, so the verdict and the rule family always travel together.
    let mut registry_a = Registry::new();
    registry_a
        .add_entry(RegistryEntry::new(BlockingType::Domain, "host.shared.example.com").unwrap())
        .unwrap();
    let mut registry_b = Registry::new();
    registry_b
        .add_entry(
            RegistryEntry::new(BlockingType::Wildcard, "*.shared.example.com").unwrap(),
        )
        .unwrap();

    store.update(&registry_a).unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            for _ in 0..5000 {
                let result = store.is_blocked("host.shared.example.com");
                // Both generations block this key; a lookup that straddled a
                // swap with a half-replaced index could drop the rule or
                // report a family neither generation holds.
                assert!(result.is_blocked);
                let reason = result.reason.expect("blocked result must carry a rule");
                assert!(
                    reason == BlockingType::Domain || reason == BlockingType::Wildcard,
                    "unexpected rule family {reason}"
                );
            }
        }));
    }

    let writer = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || {
            for round in 0..500 {
                if round % 2 == 0 {
                    store.update(&registry_b).unwrap();
                } else {
                    store.update(&registry_a).unwrap();
                }
            }
        })
    };

    for reader in readers {
        reader.await.unwrap();
    }
    writer.await.unwrap();
}
