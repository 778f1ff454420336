//! Outbound URL validation. Feeds are untrusted input, so every fetch is
//! checked against scheme, loopback, private-range, and whitelist rules
//! before any network activity.

use std::collections::HashSet;
use std::net::IpAddr;

/// Why a URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    InvalidUrl,
    Scheme(String),
    MissingHost,
    BlockedHost(String),
    NotWhitelisted(String),
}

impl std::fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlRejection::InvalidUrl => write!(f, "invalid url"),
            UrlRejection::Scheme(s) => write!(f, "disallowed scheme: {s}"),
            UrlRejection::MissingHost => write!(f, "missing hostname"),
            UrlRejection::BlockedHost(h) => write!(f, "blocked host: {h}"),
            UrlRejection::NotWhitelisted(h) => write!(f, "host not in whitelist: {h}"),
        }
    }
}

/// Validate an outbound fetch target.
///
/// When `allowed_hosts` is provided, hosts outside it are rejected; a
/// `www.`-prefixed host also matches its stripped form.
pub fn validate_url(url: &str, allowed_hosts: Option<&HashSet<String>>) -> Result<(), UrlRejection> {
    let parsed = url::Url::parse(url).map_err(|_| UrlRejection::InvalidUrl)?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(UrlRejection::Scheme(scheme.to_string()));
    }

    let host = parsed.host_str().ok_or(UrlRejection::MissingHost)?;
    if host.is_empty() {
        return Err(UrlRejection::MissingHost);
    }

    if host.eq_ignore_ascii_case("localhost") || host == "0.0.0.0" || host == "127.0.0.1" {
        return Err(UrlRejection::BlockedHost(host.to_string()));
    }

    if let Ok(IpAddr::V4(ip)) = host.parse::<IpAddr>() {
        let octets = ip.octets();
        let private = octets[0] == 10
            || (octets[0] == 172 && (16..=31).contains(&octets[1]))
            || (octets[0] == 192 && octets[1] == 168)
            || (octets[0] == 169 && octets[1] == 254)
            || ip.is_loopback();
        if private {
            return Err(UrlRejection::BlockedHost(host.to_string()));
        }
    }

    if let Some(allowed) = allowed_hosts {
        let permitted = allowed.contains(host)
            || host
                .strip_prefix("www.")
                .map(|stripped| allowed.contains(stripped))
                .unwrap_or(false);
        if !permitted {
            return Err(UrlRejection::NotWhitelisted(host.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist(hosts: &[&str]) -> HashSet<String> {
        hosts.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn accepts_public_http_and_https() {
        assert!(validate_url("https://feeds.reuters.com/world", None).is_ok());
        assert!(validate_url("http://feeds.bbci.co.uk/news/world/rss.xml", None).is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            validate_url("ftp://example.com/feed", None),
            Err(UrlRejection::Scheme(_))
        ));
        assert!(matches!(
            validate_url("file:///etc/passwd", None),
            Err(_)
        ));
    }

    #[test]
    fn rejects_loopback_and_private_ranges() {
        for url in [
            "http://localhost/feed",
            "http://127.0.0.1/feed",
            "http://0.0.0.0/feed",
            "http://10.0.0.8/feed",
            "http://172.16.4.2/feed",
            "http://172.31.255.1/feed",
            "http://192.168.1.1/feed",
            "http://169.254.0.9/feed",
        ] {
            assert!(
                matches!(validate_url(url, None), Err(UrlRejection::BlockedHost(_))),
                "{url} should be blocked"
            );
        }
        // 172.32/12 is outside the private block.
        assert!(validate_url("http://172.32.0.1/feed", None).is_ok());
    }

    #[test]
    fn whitelist_permits_www_variants() {
        let allowed = whitelist(&["nato.int", "feeds.reuters.com"]);
        assert!(validate_url("https://www.nato.int/feed", Some(&allowed)).is_ok());
        assert!(validate_url("https://feeds.reuters.com/world", Some(&allowed)).is_ok());
        assert!(matches!(
            validate_url("https://evil.example/feed", Some(&allowed)),
            Err(UrlRejection::NotWhitelisted(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate_url("not a url", None).is_err());
        assert!(validate_url("", None).is_err());
    }
}
