//! Append-only audit log over the store.
//!
//! Every state-changing API call and every authentication outcome is
//! recorded. Audit failures never break the request path: a write error is
//! logged and swallowed.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PamError;
use crate::models::{AuditEventRecord, AuditResult};
use crate::store::Store;

pub struct AuditLog {
    store: Arc<Store>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub principal_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append one event. Best-effort: store errors are logged, not raised.
    pub fn record(
        &self,
        event_type: &str,
        action: &str,
        resource: &str,
        result: AuditResult,
        context: &AuditContext,
        details: serde_json::Value,
    ) {
        info!(
            event_type,
            action,
            resource,
            result = result.as_str(),
            principal = context.principal_id.as_deref().unwrap_or("-"),
            "audit"
        );

        if let Err(e) = self.store.append_audit_event(
            event_type,
            context.principal_id.as_deref(),
            action,
            resource,
            result,
            &details,
            context.ip_address.as_deref(),
            context.user_agent.as_deref(),
        ) {
            warn!(error = %e, "audit write failed");
        }
    }

    pub fn api_access(
        &self,
        action: &str,
        resource: &str,
        result: AuditResult,
        context: &AuditContext,
        details: serde_json::Value,
    ) {
        self.record("api_access", action, resource, result, context, details);
    }

    pub fn rate_limit_denied(&self, context: &AuditContext, resource: &str) {
        self.record(
            "rate_limit",
            "request",
            resource,
            AuditResult::Denied,
            context,
            serde_json::Value::Null,
        );
    }

    pub fn query(
        &self,
        principal_id: Option<&str>,
        event_type: Option<&str>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<AuditEventRecord>, PamError> {
        self.store
            .query_audit_events(principal_id, event_type, days, limit)
    }

    /// Right to erasure: principal identifiers are nulled, events kept.
    pub fn erase_principal(&self, principal_id: &str) -> Result<usize, PamError> {
        let erased = self.store.erase_audit_principal(principal_id)?;
        info!(principal = principal_id, rows = erased, "audit principal erased");
        Ok(erased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_queryable_and_erasable() {
        let store = Store::open_in_memory().unwrap();
        let audit = AuditLog::new(store);

        let context = AuditContext {
            principal_id: Some("api_key:abc".into()),
            ip_address: Some("198.51.100.7".into()),
            user_agent: Some("test-agent".into()),
        };
        audit.api_access(
            "evaluate",
            "scenario:global_war_risk",
            AuditResult::Success,
            &context,
            serde_json::json!({"simulate": 100}),
        );
        audit.rate_limit_denied(&context, "/evaluate/global_war_risk");

        let events = audit.query(Some("api_key:abc"), None, 7, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.result == AuditResult::Denied));

        let denied = audit.query(None, Some("rate_limit"), 7, 10).unwrap();
        assert_eq!(denied.len(), 1);

        audit.erase_principal("api_key:abc").unwrap();
        let events = audit.query(None, None, 7, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.principal_id.is_none()));
        assert!(events.iter().all(|e| e.ip_address.is_none()));
    }
}
