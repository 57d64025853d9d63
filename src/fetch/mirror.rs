//! Static HTTP mirror source (community-maintained dump mirrors).

use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::fetch::source::{
    Source, SourceConfig, HEALTH_CACHE_TTL, HEALTH_PROBE_TIMEOUT, MAX_DUMP_BYTES,
};

#[derive(Debug, Default)]
struct HealthCache {
    healthy: bool,
    checked_at: Option<Instant>,
}

/// Fetches registry dumps from a plain HTTP(S) mirror.
pub struct MirrorSource {
    name: String,
    client: reqwest::Client,
    config: SourceConfig,
    health: Mutex<HealthCache>,
}

impl MirrorSource {
    pub fn new(name: impl Into<String>, config: SourceConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            client,
            config,
            health: Mutex::new(HealthCache {
                healthy: true,
                checked_at: None,
            }),
        }
    }

    async fn fetch_once(&self) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.config.url)
            .header(ACCEPT, "text/csv, application/zip, */*")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .context("HTTP request failed")?;

        if response.status() != StatusCode::OK {
            return Err(anyhow!("HTTP {}", response.status()));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_DUMP_BYTES {
                return Err(anyhow!("response too large: {length} bytes"));
            }
        }

        let data = response.bytes().await.context("reading response body")?;
        if data.is_empty() {
            return Err(anyhow!("empty registry data received"));
        }
        if data.len() as u64 > MAX_DUMP_BYTES {
            return Err(anyhow!("response too large: {} bytes", data.len()));
        }

        Ok(data.to_vec())
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
impl Source for MirrorSource {
    async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        let mut last_err = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                // Quadratic backoff: 1s, 4s, 9s, ...
                let backoff = std::time::Duration::from_secs(u64::from(attempt * attempt));
                debug!(source = %self.name, attempt, ?backoff, "retrying fetch after backoff");
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

        let probe = self
            .client
            .head(&self.config.url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send();

        let healthy = match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await {
            // Some mirrors reject HEAD outright; that still proves liveness.
            Ok(Ok(response)) => {
                response.status() == StatusCode::OK
                    || response.status() == StatusCode::METHOD_NOT_ALLOWED
            }
            _ => false,
        };

        self.record_health(healthy);
        healthy
    }
}
