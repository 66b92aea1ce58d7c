//! URL validation and normalization for SSRF protection.
//!
//! Every URL that reaches the crawler goes through [`UrlGuard::validate`]
//! first. Validation rejects non-HTTP(S) schemes, hostless URLs, blocked
//! hostnames, and any URL whose host resolves to a loopback, link-local,
//! private, or reserved address. Normalization strips the fragment and is
//! idempotent.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use tracing::debug;
use url::Url;

use crate::error::{SecurityError, SecurityResult};

/// Strip the fragment from a URL string without validating it.
pub fn defragment(url: &str) -> String {
    match url.split_once('#') {
        Some((before, _)) => before.to_string(),
        None => url.to_string(),
    }
}

/// Validator for outbound URLs.
#[derive(Debug, Clone)]
pub struct UrlGuard {
    allowed_hosts: HashSet<String>,
    blocked_hosts: HashSet<String>,
    loopback: Vec<IpNet>,
    link_local: Vec<IpNet>,
    private: Vec<IpNet>,
    reserved: Vec<IpNet>,
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlGuard {
    /// Create a guard with the default block rules.
    pub fn new() -> Self {
        Self {
            allowed_hosts: HashSet::new(),
            blocked_hosts: [
                "localhost",
                "localhost.localdomain",
                "metadata.google.internal",
                "metadata.gke.internal",
                "instance-data",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            loopback: vec![
                "127.0.0.0/8".parse().unwrap(),
                "::1/128".parse().unwrap(),
            ],
            link_local: vec![
                "169.254.0.0/16".parse().unwrap(),
                "fe80::/10".parse().unwrap(),
            ],
            private: vec![
                "10.0.0.0/8".parse().unwrap(),
                "172.16.0.0/12".parse().unwrap(),
                "192.168.0.0/16".parse().unwrap(),
                "fc00::/7".parse().unwrap(),
            ],
            reserved: vec![
                "0.0.0.0/8".parse().unwrap(),
                "100.64.0.0/10".parse().unwrap(),
                "192.0.0.0/24".parse().unwrap(),
                "198.18.0.0/15".parse().unwrap(),
                "240.0.0.0/4".parse().unwrap(),
            ],
        }
    }

    /// Block an additional hostname.
    pub fn block_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.insert(host.into().to_lowercase());
        self
    }

    /// Exempt a hostname from every check (local fixtures, trusted
    /// internal mirrors). Use sparingly.
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into().to_lowercase());
        self
    }

    /// Validate a URL and return its normalized form (fragment stripped).
    ///
    /// Resolves the host over both IPv4 and IPv6 and rejects the URL if any
    /// resolved address falls in a blocked range. DNS resolution failure
    /// does NOT fail validation; the connect attempt will surface the error.
    pub async fn validate(&self, url: &str) -> SecurityResult<String> {
        let mut parsed = Url::parse(url)?;
        parsed.set_fragment(None);

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(SecurityError::DisallowedScheme(scheme.to_string()));
        }

        let host = parsed.host_str().ok_or(SecurityError::NoHost)?.to_string();
        let host_lower = host
            .to_lowercase()
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        if self.allowed_hosts.contains(&host_lower) {
            return Ok(parsed.to_string());
        }
        if self.blocked_hosts.contains(&host_lower) {
            return Err(SecurityError::BlockedHost(host));
        }

        // Literal IPs are checked without a DNS round trip.
        if let Some(ip) = parse_ip_host(&host) {
            self.check_ip(ip)?;
            return Ok(parsed.to_string());
        }

        let port = parsed
            .port()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });

        match tokio::net::lookup_host(format!("{host}:{port}")).await {
            Ok(addrs) => {
                for addr in addrs {
                    self.check_ip(addr.ip())?;
                }
            }
            Err(e) => {
                // Unresolvable hosts pass; the fetch will fail at connect time.
                debug!(host = %host, error = %e, "DNS resolution failed during validation");
            }
        }

        Ok(parsed.to_string())
    }

    fn check_ip(&self, ip: IpAddr) -> SecurityResult<()> {
        if self.loopback.iter().any(|net| net.contains(&ip)) || ip.is_loopback() {
            return Err(SecurityError::Loopback(ip));
        }
        if self.link_local.iter().any(|net| net.contains(&ip)) {
            return Err(SecurityError::LinkLocal(ip));
        }
        if self.private.iter().any(|net| net.contains(&ip)) {
            return Err(SecurityError::PrivateAddress(ip));
        }
        if self.reserved.iter().any(|net| net.contains(&ip)) {
            return Err(SecurityError::Reserved(ip));
        }
        Ok(())
    }
}

/// Parse a URL host component as an IP literal, handling `[...]` brackets.
fn parse_ip_host(host: &str) -> Option<IpAddr> {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    trimmed.parse().ok()
}
