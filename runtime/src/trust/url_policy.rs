//! URL security policy: allow-list / block-list of domains and CIDR ranges.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Why a URL was filtered out. A filtering outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MalformedUrl(String),
    UnsupportedScheme(String),
    MissingHost,
    /// Matched a block-list entry.
    Blocked(String),
    /// A block-list entry could not be parsed; nothing passes a broken policy.
    MalformedRule(String),
    NotAllowListed,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedUrl(e) => write!(f, "malformed url: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "unsupported scheme '{s}'"),
            Self::MissingHost => write!(f, "url has no host"),
            Self::Blocked(rule) => write!(f, "blocked by rule '{rule}'"),
            Self::MalformedRule(rule) => write!(f, "malformed block rule '{rule}'"),
            Self::NotAllowListed => write!(f, "host is not on the allow list"),
        }
    }
}

/// Outcome of checking one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(Rejection),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// An IP range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    base: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `a.b.c.d/n` or `v6::addr/n`.
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = s.trim().split_once('/')?;
        let base: IpAddr = addr.trim().trim_matches(['[', ']']).parse().ok()?;
        let prefix: u8 = prefix.trim().parse().ok()?;
        let max = match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix <= max).then_some(Self { base, prefix })
    }

    /// Compare the leading `prefix` bits. Mixed address families never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.base, ip) {
            (IpAddr::V4(base), IpAddr::V4(ip)) => v4_prefix_match(base, ip, self.prefix),
            (IpAddr::V6(base), IpAddr::V6(ip)) => v6_prefix_match(base, ip, self.prefix),
            _ => false,
        }
    }
}

fn v4_prefix_match(base: Ipv4Addr, ip: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = 32 - u32::from(prefix);
    (u32::from(base) ^ u32::from(ip)) >> shift == 0
}

fn v6_prefix_match(base: Ipv6Addr, ip: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    // `segments()` is the `::`-expanded form: eight 16-bit groups.
    let shift = 128 - u32::from(prefix);
    (segments_to_bits(base) ^ segments_to_bits(ip)) >> shift == 0
}

fn segments_to_bits(addr: Ipv6Addr) -> u128 {
    addr.segments()
        .iter()
        .fold(0u128, |acc, group| (acc << 16) | u128::from(*group))
}

#[derive(Debug, Clone)]
enum BlockRule {
    Domain(String),
    Cidr(Cidr),
    Malformed,
}

/// Allow/block policy applied to every candidate URL.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    allow: Vec<String>,
    block: Vec<(String, BlockRule)>,
}

impl UrlPolicy {
    pub fn new(allow: &[String], block: &[String]) -> Self {
        let allow = allow
            .iter()
            .map(|d| normalize_domain(d))
            .filter(|d| !d.is_empty())
            .collect();

        let block = block
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| {
                let rule = if entry.contains('/') {
                    match Cidr::parse(entry) {
                        Some(cidr) => BlockRule::Cidr(cidr),
                        None => BlockRule::Malformed,
                    }
                } else {
                    BlockRule::Domain(normalize_domain(entry))
                };
                (entry.trim().to_string(), rule)
            })
            .collect();

        Self { allow, block }
    }

    /// Check a URL string. Block list first, then allow list.
    pub fn check(&self, url: &str) -> Verdict {
        match Url::parse(url) {
            Ok(url) => self.check_url(&url),
            Err(e) => Verdict::Blocked(Rejection::MalformedUrl(e.to_string())),
        }
    }

    pub fn check_url(&self, url: &Url) -> Verdict {
        if !matches!(url.scheme(), "http" | "https") {
            return Verdict::Blocked(Rejection::UnsupportedScheme(url.scheme().to_string()));
        }
        let Some(host) = url.host() else {
            return Verdict::Blocked(Rejection::MissingHost);
        };

        let ip = match &host {
            Host::Ipv4(v4) => Some(IpAddr::V4(*v4)),
            Host::Ipv6(v6) => Some(IpAddr::V6(*v6)),
            Host::Domain(_) => None,
        };
        // `::ffff:a.b.c.d` is also checked against v4 rules.
        let mapped = match &host {
            Host::Ipv6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4),
            _ => None,
        };
        // `example.com.` is the same host as `example.com`.
        let hostname = match &host {
            Host::Domain(d) => d.strip_suffix('.').unwrap_or(d).to_ascii_lowercase(),
            Host::Ipv4(v4) => v4.to_string(),
            Host::Ipv6(v6) => v6.to_string(),
        };

        for (raw, rule) in &self.block {
            let blocked = match rule {
                BlockRule::Domain(domain) => domain_matches(&hostname, domain),
                BlockRule::Cidr(cidr) => ip.into_iter().chain(mapped).any(|ip| cidr.contains(ip)),
                BlockRule::Malformed => {
                    return Verdict::Blocked(Rejection::MalformedRule(raw.clone()));
                }
            };
            if blocked {
                return Verdict::Blocked(Rejection::Blocked(raw.clone()));
            }
        }

        if self.allow.is_empty() || self.allow.iter().any(|d| domain_matches(&hostname, d)) {
            Verdict::Allowed
        } else {
            Verdict::Blocked(Rejection::NotAllowListed)
        }
    }

    /// Split candidates into allowed URLs and rejected (url, reason) pairs, keeping order.
    pub fn partition(&self, urls: Vec<Url>) -> (Vec<Url>, Vec<(Url, Rejection)>) {
        let mut allowed = Vec::with_capacity(urls.len());
        let mut rejected = Vec::new();
        for url in urls {
            match self.check_url(&url) {
                Verdict::Allowed => allowed.push(url),
                Verdict::Blocked(reason) => rejected.push((url, reason)),
            }
        }
        (allowed, rejected)
    }
}

fn normalize_domain(entry: &str) -> String {
    entry
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// `host` equals `domain` or is a subdomain of it.
fn domain_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow: &[&str], block: &[&str]) -> UrlPolicy {
        let allow: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
        let block: Vec<String> = block.iter().map(|s| s.to_string()).collect();
        UrlPolicy::new(&allow, &block)
    }

    #[test]
    fn test_default_allow() {
        let p = policy(&[], &[]);
        assert!(p.check("https://anything.example.org/page").is_allowed());
    }

    #[test]
    fn test_block_domain_suffix() {
        let p = policy(&[], &["internal.example.com"]);
        assert!(!p.check("https://internal.example.com/").is_allowed());
        assert!(!p.check("https://api.internal.example.com/x").is_allowed());
        assert!(p.check("https://notinternal.example.com/").is_allowed());
        assert!(p.check("https://example.com/").is_allowed());
    }

    #[test]
    fn test_cidr_v4_scenario() {
        let p = policy(&[], &["10.0.0.0/8"]);
        assert_eq!(
            p.check("http://10.1.2.3/admin"),
            Verdict::Blocked(Rejection::Blocked("10.0.0.0/8".into()))
        );
        assert!(p.check("http://11.1.2.3/admin").is_allowed());
        // CIDR rules never match hostnames.
        assert!(p.check("http://ten.example.com/").is_allowed());
    }

    #[test]
    fn test_cidr_v4_boundary() {
        let cidr = Cidr::parse("192.168.0.0/23").unwrap();
        assert!(cidr.contains("192.168.1.255".parse().unwrap()));
        // Last bit of the prefix flipped.
        assert!(!cidr.contains("192.168.2.0".parse().unwrap()));

        let all = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(all.contains("203.0.113.9".parse().unwrap()));

        let host = Cidr::parse("127.0.0.1/32").unwrap();
        assert!(host.contains("127.0.0.1".parse().unwrap()));
        assert!(!host.contains("127.0.0.0".parse().unwrap()));
    }

    #[test]
    fn test_cidr_v6() {
        let cidr = Cidr::parse("fd00::/8").unwrap();
        assert!(cidr.contains("fd12:3456::1".parse().unwrap()));
        assert!(!cidr.contains("fe00::1".parse().unwrap()));

        let narrow = Cidr::parse("2001:db8::/32").unwrap();
        assert!(narrow.contains("2001:db8:ffff::1".parse().unwrap()));
        assert!(!narrow.contains("2001:db9::1".parse().unwrap()));
        // Family mismatch never matches.
        assert!(!narrow.contains("10.0.0.1".parse().unwrap()));

        let p = policy(&[], &["::1/128"]);
        assert!(!p.check("http://[::1]:8080/").is_allowed());
        assert!(p.check("http://[::2]/").is_allowed());
    }

    #[test]
    fn test_malformed_cidr_rejects() {
        assert!(Cidr::parse("10.0.0.0/33").is_none());
        assert!(Cidr::parse("10.0.0/8").is_none());
        assert!(Cidr::parse("::/129").is_none());

        let p = policy(&[], &["10.0.0.0/abc"]);
        assert_eq!(
            p.check("https://example.com/"),
            Verdict::Blocked(Rejection::MalformedRule("10.0.0.0/abc".into()))
        );
    }

    #[test]
    fn test_allow_list() {
        let p = policy(&["example.com"], &["private.example.com"]);
        assert!(p.check("https://example.com/").is_allowed());
        assert!(p.check("https://www.example.com/").is_allowed());
        assert!(!p.check("https://private.example.com/").is_allowed());
        assert_eq!(
            p.check("https://example.org/"),
            Verdict::Blocked(Rejection::NotAllowListed)
        );
        assert!(!p.check("https://badexample.com/").is_allowed());
    }

    #[test]
    fn test_malformed_and_non_http() {
        let p = policy(&[], &[]);
        assert!(matches!(
            p.check("not a url"),
            Verdict::Blocked(Rejection::MalformedUrl(_))
        ));
        assert!(matches!(
            p.check("file:///etc/passwd"),
            Verdict::Blocked(Rejection::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_partition_keeps_order() {
        let p = policy(&[], &["blocked.test"]);
        let urls = vec![
            Url::parse("https://a.test/1").unwrap(),
            Url::parse("https://blocked.test/2").unwrap(),
            Url::parse("https://b.test/3").unwrap(),
        ];
        let (allowed, rejected) = p.partition(urls);
        assert_eq!(allowed.len(), 2);
        assert_eq!(allowed[0].as_str(), "https://a.test/1");
        assert_eq!(allowed[1].as_str(), "https://b.test/3");
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_trailing_dot_host() {
        let p = policy(&[], &["internal.example.com"]);
        assert_eq!(
            p.check("https://internal.example.com./"),
            Verdict::Blocked(Rejection::Blocked("internal.example.com".into()))
        );
        assert!(!p.check("https://api.internal.example.com./x").is_allowed());

        let p = policy(&["example.com"], &[]);
        assert!(p.check("https://www.example.com./").is_allowed());
        assert!(p.check("https://example.com./").is_allowed());
        assert!(!p.check("https://example.org./").is_allowed());
    }

    #[test]
    fn test_v4_mapped_v6_hits_v4_rules() {
        let p = policy(&[], &["10.0.0.0/8"]);
        assert_eq!(
            p.check("http://[::ffff:10.1.2.3]/"),
            Verdict::Blocked(Rejection::Blocked("10.0.0.0/8".into()))
        );
        assert!(p.check("http://[::ffff:11.1.2.3]/").is_allowed());
        assert!(p.check("http://[2001:db8::1]/").is_allowed());
    }
}
