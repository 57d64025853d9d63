//! Registry value objects: the parsed form of one upstream dump.
//!
//! A [`Registry`] is append-only while the parser builds it and frozen once
//! handed to the store.

use chrono::{DateTime, Utc};

use crate::blocking::{is_valid_domain, is_valid_ip, BlockingRule, BlockingType};
use crate::error::CheckError;

/// One row of the upstream dump, already split into its type family.
/// Exactly one of `domain` / `ip` / `url` is populated per family.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: String,
    pub entry_type: BlockingType,
    pub domain: String,
    pub ip: String,
    pub url: String,
    pub paths: Vec<String>,
    pub added_date: DateTime<Utc>,
    pub blocked_date: Option<DateTime<Utc>>,
    pub decision: String,
    pub decision_org: String,
}

impl RegistryEntry {
    pub fn new(entry_type: BlockingType, value: impl Into<String>) -> Result<Self, CheckError> {
        let value = value.into();
        if value.is_empty() {
            return Err(CheckError::RegistryEntryInvalid);
        }

        let mut entry = Self {
            id: String::new(),
            entry_type,
            domain: String::new(),
            ip: String::new(),
            url: String::new(),
            paths: Vec::new(),
            added_date: Utc::now(),
            blocked_date: None,
            decision: String::new(),
            decision_org: String::new(),
        };

        match entry_type {
            BlockingType::Domain | BlockingType::Wildcard | BlockingType::Sni => {
                // Wildcards are accepted on prefix alone here; the strict base
                // check happens when the entry becomes a rule.
                if !is_valid_domain(&value) && !value.starts_with("*.") {
                    return Err(CheckError::InvalidDomain);
                }
                entry.domain = value;
            }
            BlockingType::Ip => {
                if !is_valid_ip(&value) {
                    return Err(CheckError::InvalidIp);
                }
                entry.ip = value;
            }
            BlockingType::UrlPath => {
                entry.url = value;
            }
        }

        Ok(entry)
    }

    /// The validated rule this entry contributes to the index.
    pub fn to_rule(&self) -> Result<BlockingRule, CheckError> {
        let pattern = match self.entry_type {
            BlockingType::Domain | BlockingType::Wildcard | BlockingType::Sni => &self.domain,
            BlockingType::Ip => &self.ip,
            BlockingType::UrlPath => &self.url,
        };

        let mut rule = BlockingRule::new(self.entry_type, pattern.clone())?;
        rule.paths = self.paths.clone();
        Ok(rule)
    }

    pub fn is_valid(&self) -> bool {
        match self.entry_type {
            BlockingType::Domain | BlockingType::Wildcard | BlockingType::Sni => {
                !self.domain.is_empty()
            }
            BlockingType::Ip => !self.ip.is_empty(),
            BlockingType::UrlPath => !self.url.is_empty(),
        }
    }
}

/// A parsed registry dump plus its provenance metadata.
#[derive(Debug, Clone)]
pub struct Registry {
    pub entries: Vec<RegistryEntry>,
    pub last_updated: DateTime<Utc>,
    pub version: String,
    pub source: String,
    pub entry_count: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_updated: Utc::now(),
            version: String::new(),
            source: String::new(),
            entry_count: 0,
        }
    }

    pub fn add_entry(&mut self, entry: RegistryEntry) -> Result<(), CheckError> {
        if !entry.is_valid() {
            return Err(CheckError::RegistryEntryInvalid);
        }

        self.entries.push(entry);
        self.entry_count += 1;
        Ok(())
    }

    pub fn entries_by_type(&self, entry_type: BlockingType) -> Vec<&RegistryEntry> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == entry_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_populates_exactly_one_field() {
        let domain = RegistryEntry::new(BlockingType::Domain, "example.com").unwrap();
        assert_eq!(domain.domain, "example.com");
        assert!(domain.ip.is_empty());
        assert!(domain.url.is_empty());

        let ip = RegistryEntry::new(BlockingType::Ip, "10.0.0.1").unwrap();
        assert_eq!(ip.ip, "10.0.0.1");
        assert!(ip.domain.is_empty());

        let url = RegistryEntry::new(BlockingType::UrlPath, "example.com/banned").unwrap();
        assert_eq!(url.url, "example.com/banned");
    }

    #[test]
    fn entry_validation_per_family() {
        assert!(RegistryEntry::new(BlockingType::Domain, "").is_err());
        assert!(RegistryEntry::new(BlockingType::Domain, "single").is_err());
        assert!(RegistryEntry::new(BlockingType::Ip, "999.1.1.1").is_err());
        // Wildcard prefix is enough at the entry layer.
        assert!(RegistryEntry::new(BlockingType::Wildcard, "*.example.com").is_ok());
    }

    #[test]
    fn malformed_wildcard_fails_at_rule_conversion() {
        // "*.com" passes entry validation on prefix alone but has no valid
        // base domain, so it can never become an index rule.
        let entry = RegistryEntry::new(BlockingType::Wildcard, "*.com").unwrap();
        assert_eq!(entry.to_rule(), Err(CheckError::InvalidDomain));
    }

    #[test]
    fn registry_append_and_filter() {
        let mut registry = Registry::new();
        registry
            .add_entry(RegistryEntry::new(BlockingType::Domain, "a.example.com").unwrap())
            .unwrap();
        registry
            .add_entry(RegistryEntry::new(BlockingType::Ip, "10.0.0.1").unwrap())
            .unwrap();
        registry
            .add_entry(RegistryEntry::new(BlockingType::Domain, "b.example.com").unwrap())
            .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.entry_count, 3);
        assert_eq!(registry.entries_by_type(BlockingType::Domain).len(), 2);
        assert_eq!(registry.entries_by_type(BlockingType::Ip).len(), 1);
        assert!(registry.entries_by_type(BlockingType::Sni).is_empty());
    }
}
