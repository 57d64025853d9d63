//! Blocking rule model: the four rule families the registry resolves to,
//! plus the domain/IP validation they share.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::CheckError;

/// The rule family an entry belongs to. The string form is stable and used
/// in logs and response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockingType {
    Domain,
    Wildcard,
    Ip,
    UrlPath,
    Sni,
}

impl BlockingType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockingType::Domain => "domain",
            BlockingType::Wildcard => "wildcard",
            BlockingType::Ip => "ip",
            BlockingType::UrlPath => "url_path",
            BlockingType::Sni => "sni",
        }
    }
}

impl fmt::Display for BlockingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validated blocking rule as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingRule {
    pub rule_type: BlockingType,
    /// The canonical pattern matched against lookup keys.
    pub pattern: String,
    /// The pattern as it appeared in the upstream dump.
    pub original: String,
    /// Path prefixes for `UrlPath` rules; empty otherwise.
    pub paths: Vec<String>,
}

impl BlockingRule {
    pub fn new(rule_type: BlockingType, pattern: impl Into<String>) -> Result<Self, CheckError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(CheckError::BlockingRuleInvalid);
        }

        let rule = Self {
            rule_type,
            original: pattern.clone(),
            pattern,
            paths: Vec::new(),
        };
        rule.validate()?;
        Ok(rule)
    }

    fn validate(&self) -> Result<(), CheckError> {
        match self.rule_type {
            BlockingType::Domain | BlockingType::Sni => {
                if !is_valid_domain(&self.pattern) {
                    return Err(CheckError::InvalidDomain);
                }
            }
            BlockingType::Wildcard => {
                let base = self.pattern.strip_prefix("*.").unwrap_or(&self.pattern);
                if !is_valid_domain(base) {
                    return Err(CheckError::InvalidDomain);
                }
            }
            BlockingType::Ip => {
                if !is_valid_ip(&self.pattern) {
                    return Err(CheckError::InvalidIp);
                }
            }
            BlockingType::UrlPath => {
                if self.pattern.is_empty() || !self.pattern.contains('/') {
                    return Err(CheckError::BlockingRuleInvalid);
                }
            }
        }
        Ok(())
    }
}

/// Outcome of a single lookup.
#[derive(Debug, Clone)]
pub struct BlockingResult {
    pub is_blocked: bool,
    pub normalized_url: String,
    pub rule: Option<Arc<BlockingRule>>,
    pub reason: Option<BlockingType>,
    pub checked_at: DateTime<Utc>,
}

impl BlockingResult {
    pub fn new(
        is_blocked: bool,
        normalized_url: impl Into<String>,
        rule: Option<Arc<BlockingRule>>,
    ) -> Self {
        let reason = rule.as_ref().map(|r| r.rule_type);
        Self {
            is_blocked,
            normalized_url: normalized_url.into(),
            rule,
            reason,
            checked_at: Utc::now(),
        }
    }

    /// Stable string form of the match reason; `"unknown"` when nothing matched.
    pub fn reason_str(&self) -> &'static str {
        self.reason.map(BlockingType::as_str).unwrap_or("unknown")
    }
}

/// DNS name validation: labels 1-63 bytes, total length <= 253, at least two
/// labels, no leading/trailing dot, no label starting or ending with `-`.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    labels
        .iter()
        .all(|label| !label.is_empty() && label.len() <= 63 && !label.starts_with('-') && !label.ends_with('-'))
}

pub fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_type_strings_are_stable() {
        assert_eq!(BlockingType::Domain.to_string(), "domain");
        assert_eq!(BlockingType::Wildcard.to_string(), "wildcard");
        assert_eq!(BlockingType::Ip.to_string(), "ip");
        assert_eq!(BlockingType::UrlPath.to_string(), "url_path");
        assert_eq!(BlockingType::Sni.to_string(), "sni");
    }

    #[test]
    fn domain_rule_requires_valid_dns_name() {
        assert!(BlockingRule::new(BlockingType::Domain, "example.com").is_ok());
        assert!(BlockingRule::new(BlockingType::Sni, "sni.example.com").is_ok());

        assert_eq!(
            BlockingRule::new(BlockingType::Domain, "single-label"),
            Err(CheckError::InvalidDomain)
        );
        assert_eq!(
            BlockingRule::new(BlockingType::Domain, ""),
            Err(CheckError::BlockingRuleInvalid)
        );
    }

    #[test]
    fn wildcard_rule_requires_valid_base() {
        assert!(BlockingRule::new(BlockingType::Wildcard, "*.example.com").is_ok());
        // Base must itself be a DNS name with two labels or more.
        assert_eq!(
            BlockingRule::new(BlockingType::Wildcard, "*.com"),
            Err(CheckError::InvalidDomain)
        );
    }

    #[test]
    fn ip_rule_requires_parseable_address() {
        assert!(BlockingRule::new(BlockingType::Ip, "192.168.1.100").is_ok());
        assert!(BlockingRule::new(BlockingType::Ip, "255.255.255.255").is_ok());
        assert!(BlockingRule::new(BlockingType::Ip, "::1").is_ok());
        assert!(BlockingRule::new(BlockingType::Ip, "::").is_ok());

        assert_eq!(
            BlockingRule::new(BlockingType::Ip, "256.0.0.0"),
            Err(CheckError::InvalidIp)
        );
    }

    #[test]
    fn url_path_rule_requires_slash() {
        assert!(BlockingRule::new(BlockingType::UrlPath, "example.com/banned").is_ok());
        assert_eq!(
            BlockingRule::new(BlockingType::UrlPath, "example.com"),
            Err(CheckError::BlockingRuleInvalid)
        );
    }

    #[test]
    fn domain_validation_boundaries() {
        let label_63 = "a".repeat(63);
        let label_64 = "a".repeat(64);
        assert!(is_valid_domain(&format!("{label_63}.com")));
        assert!(!is_valid_domain(&format!("{label_64}.com")));

        // 253 total accepted, 254 rejected.
        let long = format!("{}.{}.{}.{}", "a".repeat(63), "b".repeat(63), "c".repeat(63), "d".repeat(61));
        assert_eq!(long.len(), 253);
        assert!(is_valid_domain(&long));
        let too_long = format!("{}x", long);
        assert!(!is_valid_domain(&too_long));

        assert!(!is_valid_domain(".example.com"));
        assert!(!is_valid_domain("example.com."));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("bad-.example.com"));
        assert!(!is_valid_domain("nodots"));
        assert!(!is_valid_domain(""));
    }

    #[test]
    fn result_reason_follows_rule() {
        let rule = Arc::new(BlockingRule::new(BlockingType::Wildcard, "*.example.com").unwrap());
        let hit = BlockingResult::new(true, "sub.example.com", Some(rule));
        assert_eq!(hit.reason, Some(BlockingType::Wildcard));
        assert_eq!(hit.reason_str(), "wildcard");

        let miss = BlockingResult::new(false, "safe.com", None);
        assert!(miss.rule.is_none());
        assert_eq!(miss.reason_str(), "unknown");
    }
}
