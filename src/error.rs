//! Error types shared across the lookup and ingest paths.
//!
//! Lookup errors (`CheckError`) surface to callers — they indicate bad input.
//! Ingest errors (`SourceError`, `ParseError`, `FetchError`) stay inside the
//! update pipeline: per-entry failures are swallowed, per-source failures
//! trigger the next source, and only total exhaustion reaches the scheduler.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced while validating or normalizing user input.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    #[error("URL cannot be empty")]
    EmptyUrl,

    #[error("invalid URL format")]
    InvalidUrl,

    #[error("unsupported protocol")]
    UnsupportedProtocol,

    #[error("invalid domain format")]
    InvalidDomain,

    #[error("invalid IP address format")]
    InvalidIp,

    #[error("URL normalization failed")]
    NormalizationFailed,

    #[error("blocking rule is invalid")]
    BlockingRuleInvalid,

    #[error("registry entry is invalid")]
    RegistryEntryInvalid,
}

/// A failure of a single registry source, with the context an operator needs
/// to tell which mirror broke and when.
#[derive(Error, Debug)]
#[error("registry source {name:?} failed during {operation}: {cause} (at {})", .timestamp.to_rfc3339())]
pub struct SourceError {
    pub name: String,
    pub operation: String,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
    pub timestamp: DateTime<Utc>,
}

impl SourceError {
    pub fn new(
        name: impl Into<String>,
        operation: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            cause: cause.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Errors produced while turning raw dump bytes into a [`Registry`].
///
/// [`Registry`]: crate::registry_data::Registry
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid registry data format")]
    InvalidFormat,

    #[error("empty registry data received")]
    EmptyData,

    #[error("unsupported registry data format")]
    UnsupportedFormat,

    #[error("{}", format_parse_failure(.format, .line, .column, .cause))]
    ParsingFailed {
        format: &'static str,
        line: usize,
        column: usize,
        cause: String,
    },
}

impl ParseError {
    pub fn failed(format: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::ParsingFailed {
            format,
            line: 0,
            column: 0,
            cause: cause.to_string(),
        }
    }

    pub fn failed_at(
        format: &'static str,
        line: usize,
        column: usize,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self::ParsingFailed {
            format,
            line,
            column,
            cause: cause.to_string(),
        }
    }
}

fn format_parse_failure(format: &str, line: &usize, column: &usize, cause: &str) -> String {
    if *line > 0 {
        format!("parsing {format} format failed at line {line}, column {column}: {cause}")
    } else {
        format!("parsing {format} format failed: {cause}")
    }
}

/// Errors surfaced by the multi-source registry client.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Every configured source was tried and none produced a usable registry.
    #[error("all registry sources failed: {0}")]
    AllSourcesFailed(#[source] Box<SourceError>),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
