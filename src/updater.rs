//! Periodic registry update scheduler.
//!
//! One long-lived task performs an update immediately on start, then waits on
//! the configured interval, a manual trigger, or a stop signal. At most one
//! update runs at a time per scheduler, and `stop` returns only after the
//! in-flight update (bounded by the update timeout) has finished.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::error::{CheckError, FetchError};
use crate::fetch::client::RegistryClient;
use crate::registry_data::Registry;
use crate::storage::store::MemoryStore;

/// Seam for fetching a registry; lets tests drive the scheduler without any
/// network.
#[async_trait]
pub trait RegistryFetcher: Send + Sync {
    async fn fetch_registry(&self) -> Result<Registry, FetchError>;
}

#[async_trait]
impl RegistryFetcher for RegistryClient {
    async fn fetch_registry(&self) -> Result<Registry, FetchError> {
        RegistryClient::fetch_registry(self).await
    }
}

/// Seam for the store side of an update.
pub trait RegistryStore: Send + Sync {
    fn update(&self, registry: &Registry) -> Result<(), CheckError>;
    fn len(&self) -> usize;
}

impl RegistryStore for MemoryStore {
    fn update(&self, registry: &Registry) -> Result<(), CheckError> {
        MemoryStore::update(self, registry)
    }

    fn len(&self) -> usize {
        MemoryStore::len(self)
    }
}

/// Scheduler retry policy.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Update period. The upstream registry refreshes roughly every 48 hours.
    pub interval: Duration,
    /// Attempts per update round.
    pub max_retries: u32,
    /// Base delay between attempts; doubles each retry.
    pub retry_delay: Duration,
    /// Wall-clock bound on one whole update round.
    pub update_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(48 * 60 * 60),
            max_retries: 3,
            retry_delay: Duration::from_secs(5 * 60),
            update_timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    running: bool,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
    total_updates: u64,
    successful_updates: u64,
}

/// Point-in-time scheduler status.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_updates: u64,
    pub successful_updates: u64,
    pub next_update: DateTime<Utc>,
    pub registry_size: usize,
}

impl SchedulerStatus {
    /// Fraction of update rounds that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_updates == 0 {
            return 0.0;
        }
        self.successful_updates as f64 / self.total_updates as f64 * 100.0
    }
}

struct SchedulerInner {
    fetcher: Arc<dyn RegistryFetcher>,
    store: Arc<dyn RegistryStore>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

struct Control {
    stop_tx: oneshot::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
    done_rx: oneshot::Receiver<()>,
}

/// Drives periodic registry updates against a store.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    control: Mutex<Option<Control>>,
}

impl Scheduler {
    pub fn new(
        fetcher: Arc<dyn RegistryFetcher>,
        store: Arc<dyn RegistryStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                fetcher,
                store,
                config,
                state: Mutex::new(SchedulerState::default()),
            }),
            control: Mutex::new(None),
        }
    }

    /// Spawns the update loop. The first update runs immediately.
    pub fn start(&self) -> anyhow::Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.running {
                bail!("scheduler is already running");
            }
            state.running = true;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        // Single-slot channel: triggers arriving while one is pending coalesce.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        *self.control.lock().unwrap() = Some(Control {
            stop_tx,
            trigger_tx,
            done_rx,
        });

        let inner = self.inner.clone();
        tokio::spawn(run_loop(inner, stop_rx, trigger_rx, done_tx));

        info!("update scheduler started");
        Ok(())
    }

    /// Signals the loop to stop and waits until the in-flight update, if any,
    /// has finished.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let control = self.control.lock().unwrap().take();
        let Some(control) = control else {
            bail!("scheduler is not running");
        };

        let _ = control.stop_tx.send(());
        let _ = control.done_rx.await;

        info!("update scheduler stopped");
        Ok(())
    }

    /// Queues an immediate update. At most one trigger is pending at a time;
    /// extra triggers before it is consumed are dropped.
    pub fn trigger_update(&self) {
        if let Some(control) = self.control.lock().unwrap().as_ref() {
            let _ = control.trigger_tx.try_send(());
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock().unwrap();
        let next_update = state
            .last_update
            .map(|at| at + self.inner.config.interval)
            .unwrap_or_else(Utc::now);

        SchedulerStatus {
            running: state.running,
            last_update: state.last_update,
            last_error: state.last_error.clone(),
            consecutive_failures: state.consecutive_failures,
            total_updates: state.total_updates,
            successful_updates: state.successful_updates,
            next_update,
            registry_size: self.inner.store.len(),
        }
    }

    /// Healthy unless updates keep failing or the last success is older than
    /// twice the update interval.
    pub fn is_healthy(&self) -> bool {
        let state = self.inner.state.lock().unwrap();

        if state.consecutive_failures >= 5 {
            return false;
        }

        if let Some(last_update) = state.last_update {
            let staleness = (Utc::now() - last_update)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if staleness > self.inner.config.interval * 2 {
                return false;
            }
        }

        true
    }
}

async fn run_loop(
    inner: Arc<SchedulerInner>,
    mut stop_rx: oneshot::Receiver<()>,
    mut trigger_rx: mpsc::Receiver<()>,
    done_tx: oneshot::Sender<()>,
) {
    let mut ticker = tokio::time::interval(inner.config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; consume it so the
    // ticker measures from now.
    ticker.tick().await;

    inner.perform_update().await;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => inner.perform_update().await,
            Some(()) = trigger_rx.recv() => {
                info!("manual registry update triggered");
                inner.perform_update().await;
            }
        }
    }

    inner.state.lock().unwrap().running = false;
    let _ = done_tx.send(());
}

impl SchedulerInner {
    async fn perform_update(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.total_updates += 1;
        }

        match tokio::time::timeout(self.config.update_timeout, self.update_with_retries()).await
        {
            Ok(Ok(())) => self.record_success(),
            Ok(Err(err)) => self.record_failure(&err),
            Err(_) => self.record_failure(&anyhow!(
                "update timed out after {:?}",
                self.config.update_timeout
            )),
        }
    }

    async fn update_with_retries(&self) -> anyhow::Result<()> {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.pow(attempt - 1);
                warn!(attempt, ?delay, "update attempt failed, backing off");
                tokio::time::sleep(delay).await;
            }

            match self.execute_update().await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }

        Err(anyhow!(
            "all retry attempts failed, last error: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    async fn execute_update(&self) -> anyhow::Result<()> {
        let registry = self
            .fetcher
            .fetch_registry()
            .await
            .context("fetching registry")?;

        if registry.is_empty() {
            bail!("received empty registry");
        }

        self.store.update(&registry).context("updating store")?;
        Ok(())
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_update = Some(Utc::now());
        state.last_error = None;
        state.consecutive_failures = 0;
        state.successful_updates += 1;
    }

    fn record_failure(&self, err: &anyhow::Error) {
        error!(error = %err, "registry update failed");
        let mut state = self.state.lock().unwrap();
        state.last_error = Some(err.to_string());
        state.consecutive_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockingType;
    use crate::error::SourceError;
    use crate::registry_data::RegistryEntry;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StaticFetcher {
        fail: AtomicBool,
    }

    impl StaticFetcher {
        fn working() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl RegistryFetcher for StaticFetcher {
        async fn fetch_registry(&self) -> Result<Registry, FetchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::AllSourcesFailed(Box::new(SourceError::new(
                    "mock", "fetch", "down",
                ))));
            }

            let mut registry = Registry::new();
            registry
                .add_entry(RegistryEntry::new(BlockingType::Domain, "blocked.com").unwrap())
                .unwrap();
            registry.source = "mock".to_string();
            Ok(registry)
        }
    }

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            update_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let scheduler = Scheduler::new(
            StaticFetcher::working(),
            Arc::new(MemoryStore::new()),
            quick_config(),
        );

        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let scheduler = Scheduler::new(
            StaticFetcher::working(),
            Arc::new(MemoryStore::new()),
            quick_config(),
        );
        assert!(scheduler.stop().await.is_err());
    }

    #[tokio::test]
    async fn initial_update_runs_immediately() {
        let store = Arc::new(MemoryStore::new());
        let scheduler =
            Scheduler::new(StaticFetcher::working(), store.clone(), quick_config());

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await.unwrap();

        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.successful_updates >= 1);
        assert!(status.last_update.is_some());
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.registry_size, 1);
        assert!(store.is_blocked("blocked.com").is_blocked);
    }

    #[tokio::test]
    async fn failures_accumulate_and_reset_on_success() {
        let fetcher = StaticFetcher::broken();
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(fetcher.clone(), store, quick_config());

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = scheduler.status();
        assert!(status.consecutive_failures >= 1);
        assert!(status.last_error.is_some());
        assert_eq!(status.successful_updates, 0);
        assert!(status.successful_updates <= status.total_updates);

        // Recovery clears the failure streak.
        fetcher.fail.store(false, Ordering::SeqCst);
        scheduler.trigger_update();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = scheduler.status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.successful_updates >= 1);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unhealthy_after_repeated_failures() {
        let scheduler = Scheduler::new(
            StaticFetcher::broken(),
            Arc::new(MemoryStore::new()),
            quick_config(),
        );

        assert!(scheduler.is_healthy());
        {
            let mut state = scheduler.inner.state.lock().unwrap();
            state.consecutive_failures = 5;
        }
        assert!(!scheduler.is_healthy());
    }

    #[tokio::test]
    async fn success_rate_reflects_counters() {
        let scheduler = Scheduler::new(
            StaticFetcher::working(),
            Arc::new(MemoryStore::new()),
            quick_config(),
        );

        assert_eq!(scheduler.status().success_rate(), 0.0);
        {
            let mut state = scheduler.inner.state.lock().unwrap();
            state.total_updates = 4;
            state.successful_updates = 3;
        }
        assert_eq!(scheduler.status().success_rate(), 75.0);
    }
}
