//! Dump parsing: format detection, encoding fallback, and entry
//! classification.
//!
//! The upstream registry ships as semicolon-separated CSV, either bare or
//! inside a ZIP container, historically encoded in Windows-1251. The URL
//! column multiplexes several values behind `|`. The parser is tolerant by
//! design: malformed rows and tokens are counted and skipped, but a dump
//! that yields zero valid entries is rejected so an empty index is never
//! published.

use std::io::{Cursor, Read};
use std::net::IpAddr;

use tracing::{debug, warn};

use crate::blocking::{is_valid_domain, BlockingType};
use crate::error::ParseError;
use crate::registry_data::{Registry, RegistryEntry};

const DEFAULT_SOURCE_LABEL: &str = "RKN Registry";

/// Bytes of the head of the payload inspected for CSV separators.
const FORMAT_SNIFF_BYTES: usize = 1024;

const ZIP_MAGICS: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpFormat {
    Zip,
    Csv,
}

/// Stateless registry dump parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parses raw dump bytes into a registry.
    pub fn parse(&self, data: &[u8]) -> Result<Registry, ParseError> {
        if data.is_empty() {
            return Err(ParseError::EmptyData);
        }

        match self.detect_format(data)? {
            DumpFormat::Zip => self.parse_zip(data),
            DumpFormat::Csv => self.parse_csv(data),
        }
    }

    fn detect_format(&self, data: &[u8]) -> Result<DumpFormat, ParseError> {
        if data.len() < 4 {
            return Err(ParseError::InvalidFormat);
        }

        if ZIP_MAGICS.iter().any(|magic| data.starts_with(magic)) {
            return Ok(DumpFormat::Zip);
        }

        let head = &data[..data.len().min(FORMAT_SNIFF_BYTES)];
        if head.contains(&b';') || head.contains(&b',') {
            return Ok(DumpFormat::Csv);
        }

        Err(ParseError::UnsupportedFormat)
    }

    /// Scans the archive for the first CSV member that parses to a non-empty
    /// registry.
    fn parse_zip(&self, data: &[u8]) -> Result<Registry, ParseError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|err| ParseError::failed("zip", format!("opening ZIP: {err}")))?;

        for index in 0..archive.len() {
            let Ok(mut member) = archive.by_index(index) else {
                continue;
            };
            if !member.name().to_ascii_lowercase().ends_with(".csv") {
                continue;
            }

            let mut contents = Vec::new();
            if member.read_to_end(&mut contents).is_err() {
                continue;
            }

            if let Ok(registry) = self.parse_csv(&contents) {
                return Ok(registry);
            }
        }

        Err(ParseError::failed("zip", "no valid CSV found in archive"))
    }

    /// Tries UTF-8 first, then Windows-1251 — the registry's historical
    /// encoding. The first decoding that yields at least one valid entry wins.
    fn parse_csv(&self, data: &[u8]) -> Result<Registry, ParseError> {
        let mut last_err = None;

        if let Ok(text) = std::str::from_utf8(data) {
            match self.parse_csv_text(text) {
                Ok(registry) => return Ok(registry),
                Err(err) => last_err = Some(err),
            }
        }

        let (decoded, _, had_errors) = encoding_rs::WINDOWS_1251.decode(data);
        if !had_errors {
            match self.parse_csv_text(&decoded) {
                Ok(registry) => return Ok(registry),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err
            .unwrap_or_else(|| ParseError::failed("csv", "undecodable CSV payload")))
    }

    fn parse_csv_text(&self, text: &str) -> Result<Registry, ParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut registry = Registry::new();
        registry.source = DEFAULT_SOURCE_LABEL.to_string();

        let mut skipped_rows = 0usize;
        for (index, record) in reader.records().enumerate() {
            let line = index + 1;
            let record = record
                .map_err(|err| ParseError::failed_at("csv", line, 0, err))?;

            // First line is the header.
            if line == 1 || record.is_empty() {
                continue;
            }

            if !self.parse_record(&record, &mut registry) {
                skipped_rows += 1;
            }
        }

        if skipped_rows > 0 {
            debug!(skipped_rows, "skipped unusable CSV rows");
        }

        if registry.is_empty() {
            return Err(ParseError::failed("csv", "no valid entries found"));
        }

        Ok(registry)
    }

    /// Returns `true` when the row contributed at least one entry. The
    /// second column carries the URL field, possibly `|`-multiplexed.
    fn parse_record(&self, record: &csv::StringRecord, registry: &mut Registry) -> bool {
        let Some(url_field) = record.get(1) else {
            return false;
        };
        let url_field = url_field.trim();
        if url_field.is_empty() {
            return false;
        }

        let mut added = false;
        for token in url_field.split('|') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if self.classify_token(token, registry) {
                added = true;
            }
        }

        added
    }

    /// Classifies one token and appends the resulting entry.
    fn classify_token(&self, token: &str, registry: &mut Registry) -> bool {
        let lowered = token.to_lowercase();
        let value = strip_scheme(&lowered);

        let (entry_type, value) = if value.starts_with("*.") {
            if !is_wildcard_token(value) {
                return false;
            }
            (BlockingType::Wildcard, value.to_string())
        } else if let Some(ip) = parse_ip_token(value) {
            (BlockingType::Ip, ip)
        } else if value.contains('/') {
            (BlockingType::UrlPath, value.to_string())
        } else if is_domain_token(value) {
            (BlockingType::Domain, value.to_string())
        } else {
            return false;
        };

        let mut entry = match RegistryEntry::new(entry_type, value) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(token, error = %err, "dropping unusable registry token");
                return false;
            }
        };
        entry.id = format!("rkn_{}", registry.len());

        registry.add_entry(entry).is_ok()
    }
}

/// Strips a leading scheme the dump sometimes carries.
fn strip_scheme(value: &str) -> &str {
    for scheme in ["https://", "http://", "ftp://"] {
        if let Some(rest) = value.strip_prefix(scheme) {
            return rest;
        }
    }
    value
}

/// An IP token, optionally `ip:port` for IPv4. Returns the bare address.
fn parse_ip_token(value: &str) -> Option<String> {
    if value.parse::<IpAddr>().is_ok() {
        return Some(value.to_string());
    }

    // `host:port` — but never split an IPv6 literal on its colons.
    if value.contains(':') && !value.contains("::") {
        let mut parts = value.splitn(2, ':');
        let host = parts.next()?;
        let port = parts.next()?;
        if !port.is_empty()
            && port.bytes().all(|b| b.is_ascii_digit())
            && host.parse::<IpAddr>().is_ok()
        {
            return Some(host.to_string());
        }
    }

    None
}

/// ASCII hostname charset check: letters, digits, hyphens and dots with
/// well-formed labels.
fn is_label_sequence(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

fn is_wildcard_token(value: &str) -> bool {
    value
        .strip_prefix("*.")
        .is_some_and(is_label_sequence)
}

fn is_domain_token(value: &str) -> bool {
    is_label_sequence(value) && is_valid_domain(value)
}
