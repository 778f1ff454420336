//! HTTP API: the service registry (`AppState`) shared by every handler and
//! the router assembly. The health probe stays outside the rate-limited
//! router and is never authenticated.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use axum::middleware as axum_mw;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::alerts::AlertEngine;
use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::PamError;
use crate::events::{ConnectionManager, EventBus};
use crate::fetcher::SecureFetcher;
use crate::metrics::MetricsRegistry;
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitState};
use crate::middleware::request_logging;
use crate::middleware::PrincipalRateLimiter;
use crate::scheduler::JobScheduler;
use crate::signals::{HypothesisEvaluator, SignalComputer};
use crate::store::async_store::AsyncStore;

/// Service registry constructed once at startup and threaded through every
/// constructor; tests build their own. No ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub store: AsyncStore,
    pub fetcher: Arc<SecureFetcher>,
    pub metrics: Arc<MetricsRegistry>,
    pub bus: Arc<EventBus>,
    pub connections: Arc<ConnectionManager>,
    pub alerts: Arc<AlertEngine>,
    pub audit: Arc<AuditLog>,
    pub limiter: Arc<PrincipalRateLimiter>,
    pub scheduler: Arc<JobScheduler>,
}

impl AppState {
    /// The current config snapshot. In-flight work keeps whatever snapshot
    /// it started with; a reload swaps the pointer atomically.
    pub fn config_snapshot(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// A fresh evaluator over the current snapshot, wired to the store and
    /// bus.
    pub fn evaluator(&self) -> HypothesisEvaluator {
        let config = self.config_snapshot();
        let computer = SignalComputer::new(config.clone(), self.fetcher.clone())
            .with_store(self.store.clone())
            .with_bus(self.bus.clone());
        HypothesisEvaluator::new(config, computer)
            .with_store(self.store.clone())
            .with_bus(self.bus.clone())
    }
}

impl IntoResponse for PamError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PamError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            PamError::InvalidRequest(_)
            | PamError::Config(_)
            | PamError::ConfigValidation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            // Opaque to callers; details go to the log.
            _ => {
                tracing::error!(error = %self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Assemble the full router: rate-limited API + public health probe.
pub fn router(state: AppState) -> Router {
    let rate_state = RateLimitState {
        limiter: state.limiter.clone(),
        audit: Some(state.audit.clone()),
    };

    let api = Router::new()
        .route("/scenarios", get(routes::get_scenarios))
        .route("/evaluate/:scenario", get(routes::evaluate_scenario))
        .route("/history/:scenario", get(routes::get_scenario_history))
        .route("/signals", get(routes::get_signals))
        .route("/signals/:name/history", get(routes::get_signal_history))
        .route("/ws", get(ws::websocket_handler))
        .layer(axum_mw::from_fn_with_state(rate_state, rate_limit_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(routes::health))
        .with_state(state);

    Router::new()
        .merge(api)
        .merge(public)
        .layer(axum_mw::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}
