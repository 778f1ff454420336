//! Shared domain types: parsed feed items, persisted records, the event
//! union carried by the bus, and the websocket wire messages.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// UTC timestamp in the canonical persisted form (RFC 3339, trailing `Z`).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One item extracted from an RSS/Atom feed. `published_raw` is kept
/// verbatim; date resolution happens at scoring time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub summary: String,
    pub published_raw: String,
}

impl ParsedItem {
    /// Hash identity for dedup and change detection. Not a security property.
    pub fn content_hash(&self) -> String {
        format!("{:x}", md5::compute(format!("{}{}", self.title, self.summary)))
    }
}

/// A persisted feed item. `(source_name, content_hash)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItemRecord {
    pub id: i64,
    pub source_name: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub published_raw: Option<String>,
    pub fetched_at: String,
    pub content_hash: String,
}

/// Append-only computed signal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalValueRecord {
    pub id: i64,
    pub signal_name: String,
    pub value: f64,
    pub country: Option<String>,
    pub computed_at: String,
    pub window_days: u32,
}

/// Append-only hypothesis evaluation. Monte Carlo fields are present only
/// when the evaluation ran with `simulate_n > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisEvalRecord {
    pub id: i64,
    pub hypothesis_name: String,
    pub probability: f64,
    pub country: Option<String>,
    pub monte_carlo_mean: Option<f64>,
    pub monte_carlo_low: Option<f64>,
    pub monte_carlo_high: Option<f64>,
    pub evaluated_at: String,
}

/// Per-source fetch bookkeeping, one row per source name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStatusRecord {
    pub source_name: String,
    pub last_fetch_at: Option<String>,
    pub last_success_at: Option<String>,
    pub fetch_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Denied,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Denied => "denied",
        }
    }
}

/// One row of the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventRecord {
    pub id: i64,
    pub ts: String,
    pub event_type: String,
    pub principal_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub result: AuditResult,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Condition an alert rule applies to the observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    GreaterThan,
    LessThan,
    Equals,
    Change,
}

/// A reconfigurable alert rule. `scenario`/`signal` narrow which events the
/// rule matches; both absent means the rule matches every event of its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub rule_id: String,
    pub name: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub scenario: Option<String>,
    pub signal: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// A fired alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: String,
    pub scenario: Option<String>,
}

/// The closed union of events carried by the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FeedUpdated {
        source: String,
        url: String,
        item_count: usize,
        /// First five items of the changed feed.
        items: Vec<ParsedItem>,
    },
    SignalUpdate {
        signal: String,
        value: f64,
        scenario: Option<String>,
        country: Option<String>,
        timestamp: String,
    },
    EvaluationUpdate {
        hypothesis: String,
        probability: f64,
        country: Option<String>,
        timestamp: String,
    },
    Alert(Alert),
}

/// Discriminant used for bus subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FeedUpdated,
    SignalUpdate,
    EvaluationUpdate,
    Alert,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::FeedUpdated { .. } => EventKind::FeedUpdated,
            Event::SignalUpdate { .. } => EventKind::SignalUpdate,
            Event::EvaluationUpdate { .. } => EventKind::EvaluationUpdate,
            Event::Alert(_) => EventKind::Alert,
        }
    }

    /// Scenario this event pertains to, used by the stream fan-out filter.
    pub fn scenario(&self) -> Option<&str> {
        match self {
            Event::SignalUpdate { scenario, .. } => scenario.as_deref(),
            Event::EvaluationUpdate { hypothesis, .. } => Some(hypothesis),
            Event::Alert(alert) => alert.scenario.as_deref(),
            Event::FeedUpdated { .. } => None,
        }
    }
}

/// Inbound websocket message from a stream client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { scenario: Option<String> },
    Unsubscribe { scenario: Option<String> },
    Ping,
}

/// Outbound websocket message to a stream client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        scenario: String,
    },
    Unsubscribed {
        scenario: String,
    },
    Pong,
    SignalUpdate {
        signal: String,
        value: f64,
        scenario: Option<String>,
        country: Option<String>,
        timestamp: String,
    },
    EvaluationUpdate {
        hypothesis: String,
        probability: f64,
        country: Option<String>,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Map a bus event to its outbound wire form, if it has one.
    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::SignalUpdate {
                signal,
                value,
                scenario,
                country,
                timestamp,
            } => Some(ServerMessage::SignalUpdate {
                signal: signal.clone(),
                value: *value,
                scenario: scenario.clone(),
                country: country.clone(),
                timestamp: timestamp.clone(),
            }),
            Event::EvaluationUpdate {
                hypothesis,
                probability,
                country,
                timestamp,
            } => Some(ServerMessage::EvaluationUpdate {
                hypothesis: hypothesis.clone(),
                probability: *probability,
                country: country.clone(),
                timestamp: timestamp.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_distinct() {
        let a = ParsedItem {
            title: "War reported".into(),
            summary: "details".into(),
            published_raw: String::new(),
        };
        let b = ParsedItem {
            title: "War reported".into(),
            summary: "other".into(),
            published_raw: String::new(),
        };
        assert_eq!(a.content_hash(), a.content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn client_message_parses_original_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action": "subscribe", "scenario": "global_war_risk"}"#)
                .unwrap();
        match msg {
            ClientMessage::Subscribe { scenario } => {
                assert_eq!(scenario.as_deref(), Some("global_war_risk"))
            }
            _ => panic!("expected subscribe"),
        }

        let ping: ClientMessage = serde_json::from_str(r#"{"action": "ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));
    }

    #[test]
    fn server_message_tags_match_protocol() {
        let json = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(json["type"], "pong");

        let json = serde_json::to_value(ServerMessage::SignalUpdate {
            signal: "border_clashes".into(),
            value: 0.4,
            scenario: None,
            country: None,
            timestamp: now_iso(),
        })
        .unwrap();
        assert_eq!(json["type"], "signal_update");
    }

    #[test]
    fn event_union_round_trips() {
        let event = Event::EvaluationUpdate {
            hypothesis: "global_war_risk".into(),
            probability: 0.11,
            country: None,
            timestamp: now_iso(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), EventKind::EvaluationUpdate);
        assert_eq!(back.scenario(), Some("global_war_risk"));
    }
}
