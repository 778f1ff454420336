//! Per-principal rate limiting for the inbound API.
//!
//! Sliding minute and hour windows per principal. The principal is the
//! first of: API key header, bearer token, client IP. The core treats it
//! as an opaque identity and never inspects the credential itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::warn;

use crate::audit::{AuditContext, AuditLog};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
        }
    }
}

#[derive(Default)]
struct PrincipalWindows {
    minute: Vec<Instant>,
    hour: Vec<Instant>,
}

pub enum RateDecision {
    Allowed { remaining: u32 },
    Exceeded { message: String },
}

pub struct PrincipalRateLimiter {
    config: RateLimitConfig,
    state: Mutex<HashMap<String, PrincipalWindows>>,
}

impl PrincipalRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.config.requests_per_minute
    }

    /// Check and record one request for `principal`.
    pub fn check(&self, principal: &str) -> RateDecision {
        let now = Instant::now();
        let mut state = self.state.lock();
        let windows = state.entry(principal.to_string()).or_default();

        windows.minute.retain(|ts| now.duration_since(*ts) < MINUTE);
        windows.hour.retain(|ts| now.duration_since(*ts) < HOUR);

        if windows.minute.len() >= self.config.requests_per_minute as usize {
            return RateDecision::Exceeded {
                message: format!(
                    "rate limit exceeded: {} requests per minute",
                    self.config.requests_per_minute
                ),
            };
        }
        if windows.hour.len() >= self.config.requests_per_hour as usize {
            return RateDecision::Exceeded {
                message: format!(
                    "rate limit exceeded: {} requests per hour",
                    self.config.requests_per_hour
                ),
            };
        }

        windows.minute.push(now);
        windows.hour.push(now);
        RateDecision::Allowed {
            remaining: self.config.requests_per_minute - windows.minute.len() as u32,
        }
    }

    /// Drop principals with no activity inside the hour window. Call from a
    /// background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.state.lock().retain(|_, windows| {
            windows.hour.retain(|ts| now.duration_since(*ts) < HOUR);
            windows.minute.retain(|ts| now.duration_since(*ts) < MINUTE);
            !windows.hour.is_empty()
        });
    }
}

/// Resolve the principal identity: API key, then bearer token, then IP.
pub fn principal_from_request(headers: &HeaderMap, addr: &SocketAddr) -> String {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return format!("api_key:{key}");
        }
    }
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return format!("bearer:{token}");
            }
        }
    }
    format!("ip:{}", addr.ip())
}

/// Middleware state: the limiter plus an optional audit sink for denials.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<PrincipalRateLimiter>,
    pub audit: Option<Arc<AuditLog>>,
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let principal = principal_from_request(request.headers(), &addr);
    let path = request.uri().path().to_string();
    let limit = state.limiter.limit().to_string();

    match state.limiter.check(&principal) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            if let Ok(value) = limit.parse() {
                headers.insert("X-RateLimit-Limit", value);
            }
            if let Ok(value) = remaining.to_string().parse() {
                headers.insert("X-RateLimit-Remaining", value);
            }
            response
        }
        RateDecision::Exceeded { message } => {
            warn!(%principal, %path, "rate limit exceeded");
            if let Some(audit) = &state.audit {
                let context = AuditContext {
                    principal_id: Some(principal),
                    ip_address: Some(addr.ip().to_string()),
                    user_agent: request
                        .headers()
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                };
                audit.rate_limit_denied(&context, &path);
            }

            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": message,
            });
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = limit.parse() {
                headers.insert("X-RateLimit-Limit", value);
            }
            headers.insert(
                "X-RateLimit-Remaining",
                axum::http::HeaderValue::from_static("0"),
            );
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, per_hour: u32) -> PrincipalRateLimiter {
        PrincipalRateLimiter::new(RateLimitConfig {
            requests_per_minute: per_minute,
            requests_per_hour: per_hour,
        })
    }

    #[test]
    fn allows_up_to_minute_quota() {
        let limiter = limiter(5, 100);
        for i in 0..5 {
            match limiter.check("api_key:k1") {
                RateDecision::Allowed { remaining } => assert_eq!(remaining, 4 - i),
                RateDecision::Exceeded { .. } => panic!("request {i} should pass"),
            }
        }
        assert!(matches!(
            limiter.check("api_key:k1"),
            RateDecision::Exceeded { .. }
        ));
    }

    #[test]
    fn hour_quota_applies_independently() {
        let limiter = limiter(100, 3);
        for _ in 0..3 {
            assert!(matches!(limiter.check("p"), RateDecision::Allowed { .. }));
        }
        match limiter.check("p") {
            RateDecision::Exceeded { message } => assert!(message.contains("per hour")),
            RateDecision::Allowed { .. } => panic!("hour quota should trip"),
        }
    }

    #[test]
    fn principals_are_isolated() {
        let limiter = limiter(1, 10);
        assert!(matches!(limiter.check("a"), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check("a"), RateDecision::Exceeded { .. }));
        assert!(matches!(limiter.check("b"), RateDecision::Allowed { .. }));
    }

    #[test]
    fn principal_resolution_order() {
        let addr: SocketAddr = "203.0.113.5:443".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        headers.insert("authorization", "Bearer tok".parse().unwrap());
        assert_eq!(principal_from_request(&headers, &addr), "api_key:secret");

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok".parse().unwrap());
        assert_eq!(principal_from_request(&headers, &addr), "bearer:tok");

        let headers = HeaderMap::new();
        assert_eq!(principal_from_request(&headers, &addr), "ip:203.0.113.5");
    }

    #[test]
    fn cleanup_drops_idle_principals() {
        let limiter = limiter(10, 100);
        limiter.check("a");
        assert_eq!(limiter.state.lock().len(), 1);
        // Entries are still inside the hour window, so they survive.
        limiter.cleanup();
        assert_eq!(limiter.state.lock().len(), 1);
    }
}
