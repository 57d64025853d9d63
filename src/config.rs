//! Configuration for the checker process.
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial file still yields a runnable configuration.
//!
//! # Example Config
//! ```toml
//! [update]
//! interval_hours = 48
//!
//! [[sources]]
//! kind = "mirror"
//! url = "https://raw.githubusercontent.com/zapret-info/z-i/master/dump.csv"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::fetch::official::OfficialConfig;
use crate::fetch::source::SourceConfig;
use crate::fetch::{MirrorSource, OfficialSource, Source};
use crate::updater::SchedulerConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Update scheduling and retry policy.
    #[serde(default)]
    pub update: UpdateConfig,

    /// Registry sources in preference order.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceEntry>,

    /// Index sizing knobs.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler and fetch timing.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpdateConfig {
    /// How often to refresh the registry, in hours.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Attempts per update round.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts in seconds; doubles per retry.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Wall-clock bound on one update round, in seconds.
    #[serde(default = "default_update_timeout_secs")]
    pub update_timeout_secs: u64,

    /// Bound on one multi-source fetch pass, in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
}

/// Which concrete source implementation an entry configures.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Mirror,
    Official,
}

/// One configured registry source.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceEntry {
    pub kind: SourceKind,
    pub url: String,

    /// Display name; defaults per kind.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Official-API only: dump format version advertised to the service.
    #[serde(default)]
    pub dump_format_version: Option<String>,

    /// Official-API only: wait between ready-polls, in seconds.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    /// Official-API only.
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

/// Index sizing.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Advisory: the index re-sizes its bloom filter to the actual entry
    /// count on every update.
    #[serde(default = "default_bloom_filter_size")]
    pub bloom_filter_size: u64,

    /// Advisory, see `bloom_filter_size`.
    #[serde(default = "default_bloom_filter_hashes")]
    pub bloom_filter_hashes: u32,

    /// Hard cap on ingested entries; anything beyond it is discarded.
    #[serde(default = "default_max_registry_size")]
    pub max_registry_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "zapret_check=debug").
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Defaults
fn default_interval_hours() -> u64 {
    48
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    300
}
fn default_update_timeout_secs() -> u64 {
    600
}
fn default_client_timeout_secs() -> u64 {
    120
}
fn default_source_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("zapret-check/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_bloom_filter_size() -> u64 {
    10_000_000
}
fn default_bloom_filter_hashes() -> u32 {
    7
}
fn default_max_registry_size() -> usize {
    5_000_000
}
fn default_log_level() -> String {
    "info".to_string()
}

fn default_sources() -> Vec<SourceEntry> {
    vec![
        SourceEntry {
            kind: SourceKind::Mirror,
            url: "https://raw.githubusercontent.com/zapret-info/z-i/master/dump.csv"
                .to_string(),
            name: Some("GitHub Mirror".to_string()),
            timeout_secs: 30,
            max_retries: 3,
            user_agent: default_user_agent(),
            dump_format_version: None,
            poll_interval_secs: None,
            max_poll_attempts: None,
        },
        SourceEntry {
            kind: SourceKind::Official,
            url: "https://vigruzki.rkn.gov.ru/services/OperatorRequest/".to_string(),
            name: None,
            timeout_secs: 60,
            max_retries: 2,
            user_agent: default_user_agent(),
            dump_format_version: None,
            poll_interval_secs: None,
            max_poll_attempts: None,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update: UpdateConfig::default(),
            sources: default_sources(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            update_timeout_secs: default_update_timeout_secs(),
            client_timeout_secs: default_client_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bloom_filter_size: default_bloom_filter_size(),
            bloom_filter_hashes: default_bloom_filter_hashes(),
            max_registry_size: default_max_registry_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        let config: Config =
            toml::from_str(&contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.sources.is_empty(),
            "at least one registry source must be configured"
        );
        for (index, source) in self.sources.iter().enumerate() {
            anyhow::ensure!(!source.url.is_empty(), "source {index} has an empty URL");
            anyhow::ensure!(
                source.timeout_secs > 0,
                "source {index} has a zero timeout"
            );
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.update.interval_hours * 3600),
            max_retries: self.update.max_retries,
            retry_delay: Duration::from_secs(self.update.retry_delay_secs),
            update_timeout: Duration::from_secs(self.update.update_timeout_secs),
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.update.client_timeout_secs)
    }

    /// Instantiates the configured sources in order.
    pub fn build_sources(&self) -> Vec<Arc<dyn Source>> {
        self.sources
            .iter()
            .map(|entry| {
                let source_config = SourceConfig {
                    url: entry.url.clone(),
                    timeout: Duration::from_secs(entry.timeout_secs),
                    max_retries: entry.max_retries,
                    user_agent: entry.user_agent.clone(),
                };

                match entry.kind {
                    SourceKind::Mirror => {
                        let name = entry.name.clone().unwrap_or_else(|| "Mirror".to_string());
                        Arc::new(MirrorSource::new(name, source_config)) as Arc<dyn Source>
                    }
                    SourceKind::Official => {
                        let mut official = OfficialConfig::default();
                        if let Some(version) = &entry.dump_format_version {
                            official.dump_format_version = version.clone();
                        }
                        if let Some(secs) = entry.poll_interval_secs {
                            official.poll_interval = Duration::from_secs(secs);
                        }
                        if let Some(attempts) = entry.max_poll_attempts {
                            official.max_poll_attempts = attempts;
                        }
                        Arc::new(OfficialSource::new(source_config, official))
                    }
                }
            })
            .collect()
    }
}
