//! Inbound middleware: per-principal rate limiting and request logging.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{principal_from_request, PrincipalRateLimiter, RateLimitConfig, RateLimitState};
