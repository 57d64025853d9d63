//! URL normalization: funnels arbitrarily-shaped input into the canonical
//! key space of the index.
//!
//! The canonical key is the lowercase ASCII host (IDN converted through IDNA
//! ToASCII, `www.` stripped) or the canonical text form of an IP address
//! (dotted-quad for IPv4, RFC 5952 shortest form for IPv6). This is the only
//! legitimate producer of keys stored in and queried against the index;
//! ingest and lookup must agree or lookups silently miss.

use std::borrow::Cow;
use std::net::Ipv6Addr;

use url::{Host, Url};

use crate::blocking::is_valid_domain;
use crate::error::CheckError;

/// Stateless URL normalizer, safe to share across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlNormalizer;

impl UrlNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalizes a raw URL to its canonical lookup key.
    pub fn normalize(&self, raw_url: &str) -> Result<String, CheckError> {
        if raw_url.is_empty() {
            return Err(CheckError::EmptyUrl);
        }

        let trimmed = raw_url.trim();
        let with_scheme: Cow<'_, str> = if trimmed.contains("://") {
            Cow::Borrowed(trimmed)
        } else {
            Cow::Owned(format!("http://{trimmed}"))
        };

        // Parsing separates host from port, so `host.example.com:8080` and
        // `[2001:db8::1]:443` both come out port-free here. A bare IPv6 host
        // without brackets fails to parse and is rejected as invalid.
        let parsed = Url::parse(&with_scheme).map_err(|_| CheckError::InvalidUrl)?;

        match parsed.host() {
            None => Err(CheckError::InvalidUrl),
            Some(Host::Ipv4(v4)) => Ok(v4.to_string()),
            Some(Host::Ipv6(v6)) => Ok(canonical_ipv6(v6)),
            Some(Host::Domain(host)) if host.is_empty() => Err(CheckError::InvalidUrl),
            Some(Host::Domain(host)) => self.normalize_domain(host),
        }
    }

    fn normalize_domain(&self, host: &str) -> Result<String, CheckError> {
        let ascii =
            idna::domain_to_ascii(host).map_err(|_| CheckError::NormalizationFailed)?;

        let mut normalized = ascii.to_ascii_lowercase();

        if let Some(without_www) = normalized.strip_prefix("www.") {
            if is_valid_domain(without_www) {
                normalized = without_www.to_string();
            }
        }

        if !is_valid_domain(&normalized) {
            return Err(CheckError::InvalidDomain);
        }

        Ok(normalized)
    }
}

fn canonical_ipv6(addr: Ipv6Addr) -> String {
    // IPv4-mapped addresses collapse to their dotted-quad form so that
    // `::ffff:192.0.2.1` and `192.0.2.1` share one key.
    match addr.to_ipv4_mapped() {
        Some(v4) => v4.to_string(),
        None => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(input: &str) -> Result<String, CheckError> {
        UrlNormalizer::new().normalize(input)
    }

    #[test]
    fn strips_schemes() {
        assert_eq!(normalize("https://example.com").unwrap(), "example.com");
        assert_eq!(normalize("http://example.com").unwrap(), "example.com");
        assert_eq!(normalize("ftp://example.com").unwrap(), "example.com");
        assert_eq!(normalize("example.com").unwrap(), "example.com");
    }

    #[test]
    fn strips_ports() {
        assert_eq!(normalize("https://example.com:443").unwrap(), "example.com");
        assert_eq!(normalize("http://example.com:80").unwrap(), "example.com");
        assert_eq!(normalize("https://example.com:8080").unwrap(), "example.com");
        assert_eq!(normalize("http://192.168.1.100:8080").unwrap(), "192.168.1.100");
        assert_eq!(normalize("https://[2001:db8::1]:443").unwrap(), "2001:db8::1");
    }

    #[test]
    fn lowercases_hosts() {
        assert_eq!(normalize("HTTPS://EXAMPLE.COM").unwrap(), "example.com");
        assert_eq!(normalize("https://ExAmPlE.cOm").unwrap(), "example.com");
    }

    #[test]
    fn strips_www_only_when_remainder_is_valid() {
        assert_eq!(normalize("https://www.example.com").unwrap(), "example.com");
        assert_eq!(
            normalize("https://www.sub.example.com").unwrap(),
            "sub.example.com"
        );
        // "www.com" would strip down to the single label "com"; keep it whole.
        assert_eq!(normalize("https://www.com").unwrap(), "www.com");
    }

    #[test]
    fn preserves_subdomains() {
        assert_eq!(normalize("https://api.example.com").unwrap(), "api.example.com");
        assert_eq!(
            normalize("https://deep.sub.example.com").unwrap(),
            "deep.sub.example.com"
        );
    }

    #[test]
    fn discards_path_query_fragment() {
        assert_eq!(normalize("https://example.com/path").unwrap(), "example.com");
        assert_eq!(normalize("https://example.com?query=1").unwrap(), "example.com");
        assert_eq!(normalize("https://example.com#fragment").unwrap(), "example.com");
        assert_eq!(
            normalize("https://example.com/path?query=1#fragment").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn canonicalizes_ip_hosts() {
        assert_eq!(normalize("http://192.168.1.1").unwrap(), "192.168.1.1");
        assert_eq!(normalize("https://[2001:db8::1]").unwrap(), "2001:db8::1");
        assert_eq!(
            normalize("https://[2001:0db8:85a3:0000:0000:8a2e:0370:7334]").unwrap(),
            "2001:db8:85a3::8a2e:370:7334"
        );
        assert_eq!(normalize("https://[::1]").unwrap(), "::1");
        assert_eq!(normalize("https://[::ffff:192.0.2.1]").unwrap(), "192.0.2.1");
    }

    #[test]
    fn converts_idn_to_punycode() {
        assert_eq!(normalize("https://тест.рф").unwrap(), "xn--e1aybc.xn--p1ai");
        assert_eq!(normalize("тест.рф").unwrap(), "xn--e1aybc.xn--p1ai");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(normalize(""), Err(CheckError::EmptyUrl));
        assert_eq!(normalize("https://"), Err(CheckError::InvalidUrl));
        assert_eq!(normalize("not-a-url"), Err(CheckError::InvalidDomain));
        // Hosts ending in an invalid IPv4-looking number fail URL parsing.
        assert_eq!(normalize("http://256.0.0.0"), Err(CheckError::InvalidUrl));
    }

    #[test]
    fn idempotent_on_canonical_output() {
        for input in [
            "https://www.Example.com:8080/path",
            "тест.рф",
            "http://192.168.1.100:8080",
            "https://[2001:db8::1]:443",
        ] {
            let once = normalize(input).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice, "normalization must be idempotent for {input}");
        }
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(normalize("  https://example.com  ").unwrap(), "example.com");
    }
}
