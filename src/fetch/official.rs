//! Official registry API source.
//!
//! The authenticated SOAP envelope of the upstream service is out of scope;
//! this source speaks the plain HTTP surface: a direct dump fetch with
//! ready-polling, and a WSDL availability probe for health checks.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::fetch::source::{
    Source, SourceConfig, HEALTH_CACHE_TTL, HEALTH_PROBE_TIMEOUT, MAX_DUMP_BYTES,
};

const DEFAULT_DUMP_FORMAT_VERSION: &str = "2.4";

/// Extra knobs only the official service understands.
#[derive(Debug, Clone)]
pub struct OfficialConfig {
    /// Dump format version advertised to the service.
    pub dump_format_version: String,
    /// Wait between ready-polls when the service answers 202.
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for OfficialConfig {
    fn default() -> Self {
        Self {
            dump_format_version: DEFAULT_DUMP_FORMAT_VERSION.to_string(),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 6,
        }
    }
}

#[derive(Debug, Default)]
struct HealthCache {
    healthy: bool,
    checked_at: Option<Instant>,
}

/// Fetches registry dumps from the official service endpoint.
pub struct OfficialSource {
    name: String,
    client: reqwest::Client,
    config: SourceConfig,
    official: OfficialConfig,
    health: Mutex<HealthCache>,
}

impl OfficialSource {
    pub fn new(config: SourceConfig, official: OfficialConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: "Official API".to_string(),
            client,
            config,
            official,
            health: Mutex::new(HealthCache {
                healthy: true,
                checked_at: None,
            }),
        }
    }

    async fn fetch_once(&self) -> anyhow::Result<Vec<u8>> {
        let mut polls = 0;

        loop {
            let response = self
                .client
                .get(&self.config.url)
                .header(ACCEPT, "text/csv, application/zip, application/xml")
                .header("X-Dump-Format-Version", &self.official.dump_format_version)
                .send()
                .await
                .context("HTTP request failed")?;

            match response.status() {
                StatusCode::OK => {
                    let data = response.bytes().await.context("reading response body")?;
                    if data.is_empty() {
                        return Err(anyhow!("empty registry data received"));
                    }
                    if data.len() as u64 > MAX_DUMP_BYTES {
                        return Err(anyhow!("response too large: {} bytes", data.len()));
                    }
                    return Ok(data.to_vec());
                }
                // Dump still being prepared server-side.
                StatusCode::ACCEPTED => {
                    polls += 1;
                    if polls >= self.official.max_poll_attempts {
                        return Err(anyhow!(
                            "dump not ready after {polls} polls"
                        ));
                    }
                    debug!(source = %self.name, polls, "dump not ready, polling again");
                    tokio::time::sleep(self.official.poll_interval).await;
                }
                status => return Err(anyhow!("HTTP {status}")),
            }
        }
    }

    fn record_health(&self, healthy: bool) {
        let mut cache = self.health.lock().unwrap();
        cache.healthy = healthy;
        cache.checked_at = Some(Instant::now());
    }

    fn cached_health(&self) -> Option<bool> {
        let cache = self.health.lock().unwrap();
        match cache.checked_at {
            Some(at) if at.elapsed() < HEALTH_CACHE_TTL => Some(cache.healthy),
            _ => None,
        }
    }
}

#[async_trait]
impl Source for OfficialSource {
    async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        let mut last_err = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(u64::from(attempt * attempt));
                tokio::time::sleep(backoff).await;
            }

            match self.fetch_once().await {
                Ok(data) => {
                    self.record_health(true);
                    return Ok(data);
                }
                Err(err) => {
                    warn!(source = %self.name, attempt, error = %err, "fetch attempt failed");
                    last_err = Some(err);
                }
            }
        }

        self.record_health(false);
        Err(SourceError::new(
            self.name.clone(),
            "fetch",
            last_err
                .unwrap_or_else(|| anyhow!("no fetch attempts were made"))
                .to_string(),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_healthy(&self) -> bool {
        if let Some(cached) = self.cached_health() {
            return cached;
        }

        // SOAP services answer a WSDL GET even when the dump endpoint needs
        // authentication.
        let wsdl_url = format!("{}?wsdl", self.config.url.trim_end_matches('/'));
        let probe = self
            .client
            .get(&wsdl_url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send();

        let healthy = match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(response)) => response.status() == StatusCode::OK,
            _ => false,
        };

        self.record_health(healthy);
        healthy
    }
}
