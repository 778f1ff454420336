//! Rule-driven alerting over signal and evaluation events.
//!
//! The engine subscribes to `signal_update` and `evaluation_update`,
//! evaluates every enabled rule whose scenario/signal filter matches, and
//! on a hit records an alert, notifies registered notifiers best-effort,
//! and republishes the alert onto the bus (held weakly, so dropping the
//! bus or the engine leaks nothing).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::bus::{EventBus, EventHandler};
use crate::models::{now_iso, Alert, AlertCondition, AlertRule, AlertSeverity, Event};

/// Tolerance for `equals` and the severity denominator floor.
const EPSILON: f64 = 1e-9;
/// Bounded in-memory alert history.
const ALERT_RING_CAPACITY: usize = 1000;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct AlertEngine {
    rules: RwLock<HashMap<String, AlertRule>>,
    /// Per-rule last observation, for `change` conditions.
    last_seen: Mutex<HashMap<String, f64>>,
    alerts: Mutex<VecDeque<Alert>>,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    bus: Mutex<Weak<EventBus>>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the engine back onto the bus for republishing fired alerts.
    pub fn attach_bus(&self, bus: &Arc<EventBus>) {
        *self.bus.lock() = Arc::downgrade(bus);
    }

    pub fn add_rule(&self, rule: AlertRule) {
        info!(rule = %rule.name, rule_id = %rule.rule_id, "alert rule added");
        self.rules.write().insert(rule.rule_id.clone(), rule);
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self.rules.write().remove(rule_id).is_some();
        if removed {
            self.last_seen.lock().remove(rule_id);
            info!(rule_id, "alert rule removed");
        }
        removed
    }

    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        match self.rules.write().get_mut(rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().values().cloned().collect()
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifiers.write().push(notifier);
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Severity ladder on the relative deviation from the threshold.
    fn severity(value: f64, threshold: f64) -> AlertSeverity {
        let deviation = (value - threshold).abs() / threshold.abs().max(EPSILON);
        if deviation > 0.5 {
            AlertSeverity::Critical
        } else if deviation > 0.3 {
            AlertSeverity::High
        } else if deviation > 0.1 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }

    /// Whether `rule` fires for `value`. `change` compares against the
    /// rule's previous observation and records the new one either way.
    fn condition_met(&self, rule: &AlertRule, value: f64) -> bool {
        match rule.condition {
            AlertCondition::GreaterThan => value > rule.threshold,
            AlertCondition::LessThan => value < rule.threshold,
            AlertCondition::Equals => (value - rule.threshold).abs() <= EPSILON,
            AlertCondition::Change => {
                let mut last_seen = self.last_seen.lock();
                let previous = last_seen.insert(rule.rule_id.clone(), value);
                match previous {
                    Some(previous) => (value - previous).abs() >= rule.threshold,
                    None => false,
                }
            }
        }
    }

    async fn trigger(&self, rule: &AlertRule, value: f64, scenario: Option<&str>) {
        let relation = if value > rule.threshold { "exceeds" } else { "below" };
        let alert = Alert {
            alert_id: Uuid::new_v4().to_string(),
            rule_id: rule.rule_id.clone(),
            severity: Self::severity(value, rule.threshold),
            message: format!(
                "{}: {:.2} {} threshold {:.2}",
                rule.name, value, relation, rule.threshold
            ),
            value,
            threshold: rule.threshold,
            timestamp: now_iso(),
            scenario: scenario.map(str::to_string),
        };

        warn!(
            rule = %rule.name,
            severity = alert.severity.as_str(),
            value,
            "alert triggered: {}",
            alert.message
        );

        {
            let mut alerts = self.alerts.lock();
            if alerts.len() >= ALERT_RING_CAPACITY {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
        }

        let notifiers: Vec<Arc<dyn Notifier>> = self.notifiers.read().clone();
        for notifier in notifiers {
            if let Err(e) = notifier.notify(&alert).await {
                error!(notifier = notifier.name(), error = %e, "notifier failed");
            }
        }

        let bus = self.bus.lock().upgrade();
        if let Some(bus) = bus {
            bus.publish(Event::Alert(alert)).await;
        }
    }

    async fn process(&self, value: f64, scenario: Option<&str>, signal: Option<&str>) {
        let rules: Vec<AlertRule> = self.rules.read().values().cloned().collect();
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            if let Some(rule_scenario) = &rule.scenario {
                if scenario != Some(rule_scenario.as_str()) {
                    continue;
                }
            }
            if let Some(rule_signal) = &rule.signal {
                if signal != Some(rule_signal.as_str()) {
                    continue;
                }
            }
            if self.condition_met(&rule, value) {
                self.trigger(&rule, value, scenario).await;
            }
        }
    }
}

#[async_trait]
impl EventHandler for AlertEngine {
    fn name(&self) -> &str {
        "alert_engine"
    }

    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        match event {
            Event::EvaluationUpdate {
                hypothesis,
                probability,
                ..
            } => {
                self.process(probability, Some(&hypothesis), None).await;
            }
            Event::SignalUpdate { signal, value, .. } => {
                self.process(value, None, Some(&signal)).await;
            }
            _ => {}
        }
        Ok(())
    }
}
