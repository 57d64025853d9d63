//! Multi-source registry client: ordered fallback with sticky-first
//! source preference.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{FetchError, SourceError};
use crate::fetch::parser::Parser;
use crate::fetch::source::Source;
use crate::registry_data::Registry;

#[derive(Debug, Default)]
struct ClientState {
    last_successful_source: Option<String>,
    last_update_time: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Fetches the registry from an ordered list of sources, preferring the one
/// that succeeded most recently.
pub struct RegistryClient {
    sources: Vec<Arc<dyn Source>>,
    parser: Parser,
    timeout: Duration,
    state: Mutex<ClientState>,
}

impl RegistryClient {
    /// At least one source is required.
    pub fn new(sources: Vec<Arc<dyn Source>>, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !sources.is_empty(),
            "at least one source must be configured"
        );

        Ok(Self {
            sources,
            parser: Parser::new(),
            timeout,
            state: Mutex::new(ClientState::default()),
        })
    }

    /// Tries each source in preference order until one yields a parseable,
    /// non-empty registry. The whole operation is bounded by the client
    /// timeout.
    pub async fn fetch_registry(&self) -> Result<Registry, FetchError> {
        match tokio::time::timeout(self.timeout, self.fetch_ordered()).await {
            Ok(result) => result,
            Err(_) => {
                self.on_failure();
                Err(FetchError::AllSourcesFailed(Box::new(SourceError::new(
                    "client",
                    "timeout",
                    format!("no source answered within {:?}", self.timeout),
                ))))
            }
        }
    }

    async fn fetch_ordered(&self) -> Result<Registry, FetchError> {
        let mut last_err: Option<SourceError> = None;

        for source in self.ordered_sources() {
            match self.fetch_from(source.as_ref()).await {
                Ok(registry) => {
                    self.on_success(source.name());
                    info!(
                        source = source.name(),
                        entries = registry.len(),
                        "registry fetched"
                    );
                    return Ok(registry);
                }
                Err(err) => {
                    warn!(source = source.name(), error = %err, "source failed, trying next");
                    last_err = Some(err);
                }
            }
        }

        self.on_failure();
        Err(FetchError::AllSourcesFailed(Box::new(
            last_err.unwrap_or_else(|| {
                SourceError::new("client", "fetch", "no sources configured")
            }),
        )))
    }

    async fn fetch_from(&self, source: &dyn Source) -> Result<Registry, SourceError> {
        if !source.is_healthy().await {
            return Err(SourceError::new(
                source.name(),
                "health_check",
                "source is not healthy",
            ));
        }

        let data = source.fetch().await?;

        let mut registry = self
            .parser
            .parse(&data)
            .map_err(|err| SourceError::new(source.name(), "parse", err.to_string()))?;

        registry.source = source.name().to_string();
        registry.last_updated = Utc::now();

        Ok(registry)
    }

    /// Sources in probe order: the last successful one first, the rest in
    /// configured order.
    fn ordered_sources(&self) -> Vec<Arc<dyn Source>> {
        let preferred = self
            .state
            .lock()
            .unwrap()
            .last_successful_source
            .clone();

        let Some(preferred) = preferred else {
            return self.sources.clone();
        };

        let mut ordered = Vec::with_capacity(self.sources.len());
        let mut rest = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if source.name() == preferred {
                ordered.push(source.clone());
            } else {
                rest.push(source.clone());
            }
        }
        ordered.extend(rest);
        ordered
    }

    fn on_success(&self, source_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.last_successful_source = Some(source_name.to_string());
        state.last_update_time = Some(Utc::now());
        state.consecutive_failures = 0;
    }

    fn on_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.consecutive_failures += 1;
    }

    /// Health of every configured source, probed now.
    pub async fn health_status(&self) -> Vec<(String, bool)> {
        let mut status = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            status.push((source.name().to_string(), source.is_healthy().await));
        }
        status
    }

    pub fn last_successful_source(&self) -> Option<String> {
        self.state.lock().unwrap().last_successful_source.clone()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_update_time
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().unwrap().consecutive_failures
    }
}
