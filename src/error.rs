//! Error taxonomy for the engine core.
//!
//! Transient fetch and parse failures are recovered locally (a failed
//! fetch is a `FetchResult` with `ok = false`, a broken feed parses to an
//! empty item list) and never become errors here. What remains is what
//! callers must handle: config problems, unknown names, bad request
//! parameters, and store failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PamError {
    /// Config file missing or unparseable. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Config parsed but failed validation; carries every violation found.
    #[error("config validation failed: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    /// Unknown scenario/signal/source; maps to 404 at the API.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Malformed request parameter; maps to 400 at the API.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Database unavailable or rejecting the operation.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PamError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        PamError::NotFound {
            kind,
            name: name.into(),
        }
    }
}
