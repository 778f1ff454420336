//! Secure feed fetching: validated, throttled, cached, size-capped HTTP GET
//! against untrusted hosts, plus a semaphore-bounded bulk operation.
//!
//! Policy order on every call: URL validation, per-host throttle, cache
//! lookup, network GET. Rate limiting therefore applies even to cache hits.

pub mod cache;
pub mod guard;
pub mod throttle;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::PamError;
use crate::metrics::MetricsRegistry;
use cache::TtlCache;
use throttle::HostThrottle;

/// Hard cap on any feed response.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;
/// Successful fetches are cached for ten minutes.
pub const FEED_CACHE_TTL: Duration = Duration::from_secs(600);
pub const USER_AGENT: &str = "World-PAM/1.0 (Geopolitical Risk Analysis Tool)";
/// Default fan-out bound for `fetch_all`.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source_name: String,
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub source_name: String,
    pub url: String,
    pub data: Option<Vec<u8>>,
    pub ok: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

impl FetchResult {
    fn success(source_name: &str, url: &str, data: Vec<u8>, duration: Duration) -> Self {
        Self {
            source_name: source_name.to_string(),
            url: url.to_string(),
            data: Some(data),
            ok: true,
            duration,
            error: None,
        }
    }

    fn failure(source_name: &str, url: &str, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            source_name: source_name.to_string(),
            url: url.to_string(),
            data: None,
            ok: false,
            duration,
            error: Some(error.into()),
        }
    }
}

pub struct SecureFetcher {
    client: reqwest::Client,
    cache: TtlCache,
    throttle: HostThrottle,
    allowed_hosts: Option<HashSet<String>>,
    metrics: Arc<MetricsRegistry>,
}

impl SecureFetcher {
    /// `allowed_hosts` is derived from config at startup; `None` disables
    /// the whitelist (the loopback/private-range rules still apply).
    pub fn new(
        allowed_hosts: Option<HashSet<String>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, PamError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PamError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            cache: TtlCache::new(FEED_CACHE_TTL),
            throttle: HostThrottle::default(),
            allowed_hosts,
            metrics,
        })
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn throttle(&self) -> &HostThrottle {
        &self.throttle
    }

    /// Fetch one feed. Never panics and never propagates: every outcome is
    /// a `FetchResult`.
    pub async fn fetch(&self, source_name: &str, url: &str, timeout: Duration) -> FetchResult {
        let start = Instant::now();

        if let Err(rejection) = guard::validate_url(url, self.allowed_hosts.as_ref()) {
            warn!(source = source_name, url, %rejection, "rejected fetch target");
            self.metrics.increment_tagged("http_errors", source_name);
            return FetchResult::failure(source_name, url, start.elapsed(), rejection.to_string());
        }

        // Host is present: validate_url already required it.
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        if !self.throttle.try_acquire(&host) {
            debug!(source = source_name, %host, "per-host rate limit hit");
            self.metrics.increment_tagged("http_errors", source_name);
            return FetchResult::failure(source_name, url, start.elapsed(), "rate limited");
        }

        let cache_key = format!("feed:{url}");
        if let Some(data) = self.cache.get(&cache_key) {
            debug!(source = source_name, "cache hit");
            self.metrics.increment_tagged("cache_hits", source_name);
            return FetchResult::success(source_name, url, data, start.elapsed());
        }

        let body = {
            let _timer = self.metrics.start_timer("feed_fetch");
            self.get_capped(url, timeout).await
        };

        match body {
            Ok(data) if data.is_empty() => {
                self.metrics.increment_tagged("http_errors", source_name);
                FetchResult::failure(source_name, url, start.elapsed(), "empty response body")
            }
            Ok(data) => {
                self.cache.set(cache_key, data.clone());
                self.metrics.increment_tagged("http_success", source_name);
                self.metrics.increment_tagged("cache_misses", source_name);
                FetchResult::success(source_name, url, data, start.elapsed())
            }
            Err(error) => {
                warn!(source = source_name, url, %error, "feed fetch failed");
                self.metrics.increment_tagged("http_errors", source_name);
                FetchResult::failure(source_name, url, start.elapsed(), error)
            }
        }
    }

    /// GET with the per-source timeout and the 10 MiB cap, enforced both
    /// via Content-Length and while streaming the body.
    async fn get_capped(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request failed: {e}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("http status {status}"));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_RESPONSE_BYTES as u64 {
                return Err(format!("response too large: {length} bytes"));
            }
        }

        let mut response = response;
        let mut data: Vec<u8> = Vec::with_capacity(8 * 1024);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("read failed: {e}"))?
        {
            data.extend_from_slice(&chunk);
            if data.len() > MAX_RESPONSE_BYTES {
                return Err(format!("response exceeded {MAX_RESPONSE_BYTES} byte cap"));
            }
        }

        Ok(data)
    }

    /// Fan out over `requests` with at most `max_concurrent` in flight.
    /// Always yields one entry per input source; internal failures produce
    /// synthetic error results rather than missing keys.
    pub async fn fetch_all(
        &self,
        requests: Vec<FetchRequest>,
        max_concurrent: usize,
    ) -> HashMap<String, FetchResult> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let futures = requests.into_iter().map(|request| {
            let semaphore = semaphore.clone();
            async move {
                match semaphore.acquire().await {
                    Ok(_permit) => {
                        self.fetch(&request.source_name, &request.url, request.timeout)
                            .await
                    }
                    Err(e) => FetchResult::failure(
                        &request.source_name,
                        &request.url,
                        Duration::ZERO,
                        format!("fetch slot unavailable: {e}"),
                    ),
                }
            }
        });

        let results = futures_util::future::join_all(futures).await;
        results
            .into_iter()
            .map(|result| (result.source_name.clone(), result))
            .collect()
    }
}
