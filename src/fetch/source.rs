//! The registry source abstraction.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceError;

/// Responses above this size are refused outright.
pub const MAX_DUMP_BYTES: u64 = 100 * 1024 * 1024;

/// How long a health probe result stays cached.
pub const HEALTH_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Hard cap on a single health probe.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A place registry dumps come from: a static mirror, the official API, or a
/// mock in tests. Implementations retry internally and keep their own cached
/// health state.
#[async_trait]
pub trait Source: Send + Sync {
    /// Retrieves one raw dump. Retries up to the configured attempt count
    /// before giving up.
    async fn fetch(&self) -> Result<Vec<u8>, SourceError>;

    /// Human-readable source name used in logs and registry metadata.
    fn name(&self) -> &str;

    /// Cheap availability check; cached for [`HEALTH_CACHE_TTL`].
    async fn is_healthy(&self) -> bool;
}

/// Connection settings shared by all concrete sources.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            user_agent: concat!("zapret-check/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
