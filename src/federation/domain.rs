//! Remote domain policy
//!
//! Decides whether a remote URI may be fetched at all: the configured
//! domain blocklist, and the SSRF guard that keeps outbound requests away
//! from loopback, private and link-local destinations.

use std::net::IpAddr;
use url::Url;

use super::error::FetchError;

/// Normalized host of a URI: lowercase, no trailing dot
pub fn extract_domain(uri: &str) -> Option<String> {
    let parsed = Url::parse(uri.trim()).ok()?;
    let host = parsed.host_str()?;
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Set of blocked domains
///
/// Blocking a domain also blocks all of its subdomains.
#[derive(Debug, Clone, Default)]
pub struct DomainBlocklist {
    domains: Vec<String>,
}

impl DomainBlocklist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| domain.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();
        Self { domains }
    }

    /// The blocklist entry matching `domain` or one of its parents
    pub fn matching_entry(&self, domain: &str) -> Option<&str> {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        self.domains
            .iter()
            .find(|blocked| {
                domain == **blocked
                    || domain
                        .strip_suffix(blocked.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
            .map(String::as_str)
    }

    pub fn is_blocked(&self, domain: &str) -> bool {
        self.matching_entry(domain).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Parse a fetch target and reject URLs that are not plain http(s)
///
/// With `ssrf_protection`, obviously local hosts are rejected here and
/// [`validate_resolved_host`] must be called before connecting.
pub fn parse_fetch_url(uri: &str, ssrf_protection: bool) -> Result<Url, FetchError> {
    let url = Url::parse(uri).map_err(|e| FetchError::UnsafeUrl(format!("{}: {}", uri, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FetchError::UnsafeUrl(format!(
                "unsupported scheme {}",
                scheme
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| FetchError::UnsafeUrl(format!("missing host in {}", uri)))?;

    if ssrf_protection && is_disallowed_host(host) {
        return Err(FetchError::UnsafeUrl(format!("local address {}", host)));
    }

    Ok(url)
}

/// Resolve the host of `url` and reject it if any address is local
///
/// Catches public-looking names that resolve to internal addresses.
pub async fn validate_resolved_host(url: &Url) -> Result<(), FetchError> {
    let host = url
        .host_str()
        .ok_or_else(|| FetchError::UnsafeUrl("missing host".to_string()))?
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| FetchError::UnsafeUrl(format!("missing port for {}", host)))?;

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| FetchError::Unreachable(format!("failed to resolve {}: {}", host, e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(FetchError::UnsafeUrl(format!(
                "{} resolves to local address {}",
                host,
                addr.ip()
            )));
        }
    }

    if !resolved_any {
        return Err(FetchError::Unreachable(format!("no DNS records for {}", host)));
    }

    Ok(())
}
