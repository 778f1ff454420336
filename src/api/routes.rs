//! Request/response handlers for the stateless API surface.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::audit::AuditContext;
use crate::error::PamError;
use crate::metrics::{health_report, HealthReport};
use crate::middleware::principal_from_request;
use crate::models::{AuditResult, HypothesisEvalRecord, SignalValueRecord};

use super::AppState;

const MAX_SIMULATE: usize = 10_000;
const MAX_HISTORY_DAYS: u32 = 365;

fn audit_context(headers: &HeaderMap, addr: &SocketAddr) -> AuditContext {
    AuditContext {
        principal_id: Some(principal_from_request(headers, addr)),
        ip_address: Some(addr.ip().to_string()),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

fn validate_days(days: u32) -> Result<u32, PamError> {
    if (1..=MAX_HISTORY_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(PamError::InvalidRequest(format!(
            "days must be between 1 and {MAX_HISTORY_DAYS}"
        )))
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub prior: f64,
    pub signals: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScenariosResponse {
    pub scenarios: Vec<ScenarioInfo>,
}

pub async fn get_scenarios(State(state): State<AppState>) -> Json<ScenariosResponse> {
    let config = state.config_snapshot();
    let scenarios = config
        .hypotheses
        .iter()
        .map(|h| ScenarioInfo {
            name: h.name.clone(),
            prior: h.prior,
            signals: h.signals.clone(),
        })
        .collect();
    Json(ScenariosResponse { scenarios })
}

#[derive(Debug, Deserialize)]
pub struct EvaluateQuery {
    pub country: Option<String>,
    #[serde(default)]
    pub simulate: usize,
}

#[derive(Debug, Serialize)]
pub struct SignalContribution {
    pub name: String,
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Serialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Serialize)]
pub struct MonteCarloResponse {
    pub mean: f64,
    pub confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub scenario: String,
    pub probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub signals: Vec<SignalContribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monte_carlo: Option<MonteCarloResponse>,
}

pub async fn evaluate_scenario(
    Path(scenario): Path<String>,
    Query(query): Query<EvaluateQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<EvaluateResponse>, PamError> {
    if query.simulate > MAX_SIMULATE {
        return Err(PamError::InvalidRequest(format!(
            "simulate must be between 0 and {MAX_SIMULATE}"
        )));
    }

    let context = audit_context(&headers, &addr);
    let evaluator = state.evaluator();
    let result = evaluator
        .evaluate(&scenario, query.country.as_deref(), query.simulate)
        .await;

    let audit_result = if result.is_ok() {
        AuditResult::Success
    } else {
        AuditResult::Failure
    };
    state.audit.api_access(
        "evaluate",
        &format!("scenario:{scenario}"),
        audit_result,
        &context,
        serde_json::json!({ "simulate": query.simulate, "country": query.country }),
    );

    let evaluation = result?;
    Ok(Json(EvaluateResponse {
        scenario: evaluation.hypothesis,
        probability: evaluation.probability,
        country: evaluation.country,
        signals: evaluation
            .contributions
            .into_iter()
            .map(|c| SignalContribution {
                name: c.signal,
                value: c.value,
                weight: c.weight,
            })
            .collect(),
        monte_carlo: evaluation.monte_carlo.map(|m| MonteCarloResponse {
            mean: m.mean,
            confidence_interval: ConfidenceInterval {
                low: m.low,
                high: m.high,
            },
        }),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_days")]
    pub days: u32,
    pub country: Option<String>,
}

fn default_history_days() -> u32 {
    7
}

#[derive(Debug, Serialize)]
pub struct ScenarioHistoryResponse {
    pub scenario: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub days: u32,
    pub history: Vec<HypothesisEvalRecord>,
}

pub async fn get_scenario_history(
    Path(scenario): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<ScenarioHistoryResponse>, PamError> {
    let days = validate_days(query.days)?;
    let config = state.config_snapshot();
    if config.hypothesis(&scenario).is_none() {
        return Err(PamError::not_found("scenario", &scenario));
    }

    let history = state
        .store
        .get_hypothesis_history(scenario.clone(), days, query.country.clone())
        .await?;
    Ok(Json(ScenarioHistoryResponse {
        scenario,
        country: query.country,
        days,
        history,
    }))
}

#[derive(Debug, Serialize)]
pub struct SignalInfo {
    pub name: String,
    pub weight: f64,
    pub aggregation: String,
    pub cap: f64,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct SignalsResponse {
    pub signals: Vec<SignalInfo>,
}

pub async fn get_signals(State(state): State<AppState>) -> Json<SignalsResponse> {
    let config = state.config_snapshot();
    let signals = config
        .signals
        .iter()
        .map(|s| SignalInfo {
            name: s.name.clone(),
            weight: s.weight,
            aggregation: s.aggregation.clone(),
            cap: s.cap,
            description: s.description.clone(),
        })
        .collect();
    Json(SignalsResponse { signals })
}

#[derive(Debug, Serialize)]
pub struct SignalHistoryResponse {
    pub signal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub days: u32,
    pub history: Vec<SignalValueRecord>,
}

pub async fn get_signal_history(
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<SignalHistoryResponse>, PamError> {
    let days = validate_days(query.days)?;
    let config = state.config_snapshot();
    if config.signal(&name).is_none() {
        return Err(PamError::not_found("signal", &name));
    }

    let history = state
        .store
        .get_signal_history(name.clone(), days, query.country.clone())
        .await?;
    Ok(Json(SignalHistoryResponse {
        signal: name,
        country: query.country,
        days,
        history,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(health_report(&state.metrics))
}
