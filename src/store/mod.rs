//! Durable persistence for feed items, signal values, evaluations, source
//! status, and the audit log.
//!
//! A single embedded SQLite file in WAL mode behind a mutex. Schema is
//! created lazily on open, writers are serialized, and readers observe
//! their own writes. The async variant in `async_store` wraps this type.

pub mod async_store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PamError;
use crate::models::{
    AuditEventRecord, AuditResult, FeedItemRecord, HypothesisEvalRecord, SignalValueRecord,
    SourceStatusRecord,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS feed_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT '',
    published TEXT,
    fetched_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    UNIQUE(source_name, content_hash)
);

CREATE TABLE IF NOT EXISTS signal_values (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_name TEXT NOT NULL,
    value REAL NOT NULL,
    country TEXT,
    computed_at TEXT NOT NULL,
    window_days INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS hypothesis_evaluations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hypothesis_name TEXT NOT NULL,
    probability REAL NOT NULL,
    country TEXT,
    monte_carlo_mean REAL,
    monte_carlo_low REAL,
    monte_carlo_high REAL,
    evaluated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS source_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL UNIQUE,
    last_fetch_at TEXT,
    last_success_at TEXT,
    fetch_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    event_type TEXT NOT NULL,
    principal_id TEXT,
    action TEXT NOT NULL,
    resource TEXT NOT NULL,
    result TEXT NOT NULL,
    details TEXT,
    ip_address TEXT,
    user_agent TEXT
);

CREATE INDEX IF NOT EXISTS idx_feed_items_source ON feed_items(source_name);
CREATE INDEX IF NOT EXISTS idx_feed_items_fetched ON feed_items(fetched_at);
CREATE INDEX IF NOT EXISTS idx_signal_values_signal ON signal_values(signal_name);
CREATE INDEX IF NOT EXISTS idx_signal_values_computed ON signal_values(computed_at);
CREATE INDEX IF NOT EXISTS idx_hypothesis_evaluations_name ON hypothesis_evaluations(hypothesis_name);
CREATE INDEX IF NOT EXISTS idx_hypothesis_evaluations_evaluated ON hypothesis_evaluations(evaluated_at);
CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log(ts);
CREATE INDEX IF NOT EXISTS idx_audit_principal ON audit_log(principal_id);
CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_log(event_type);
"#;

/// Row counts removed by `cleanup_old_data`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CleanupCounts {
    pub feed_items: usize,
    pub signals: usize,
    pub evaluations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub feed_items: i64,
    pub signal_values: i64,
    pub evaluations: i64,
    pub audit_events: i64,
    pub items_by_source: Vec<(String, i64)>,
}

/// Synchronous embedded store. Safe to share across threads; all access is
/// serialized on one connection.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

fn cutoff_iso(days: u32) -> String {
    (Utc::now() - Duration::days(i64::from(days)))
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    pub fn open(path: &Path) -> Result<Arc<Self>, PamError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(%journal_mode, "WAL mode not active");
        }

        info!(path = %path.display(), "store initialized");
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        }))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Arc<Self>, PamError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist one feed item. Idempotent on `(source_name, content_hash)`:
    /// a duplicate insert is a no-op returning the existing row id.
    pub fn store_feed_item(
        &self,
        source_name: &str,
        url: &str,
        title: &str,
        summary: &str,
        published: Option<&str>,
    ) -> Result<i64, PamError> {
        let content_hash = format!("{:x}", md5::compute(format!("{title}{summary}")));
        let fetched_at = crate::models::now_iso();

        let conn = self.conn.lock();
        let changes = conn.execute(
            "INSERT OR IGNORE INTO feed_items
             (source_name, url, title, summary, published, fetched_at, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![source_name, url, title, summary, published, fetched_at, content_hash],
        )?;

        if changes > 0 {
            return Ok(conn.last_insert_rowid());
        }

        let id: i64 = conn.query_row(
            "SELECT id FROM feed_items WHERE source_name = ?1 AND content_hash = ?2",
            params![source_name, content_hash],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Append-only; signal values are never updated.
    pub fn store_signal_value(
        &self,
        signal_name: &str,
        value: f64,
        country: Option<&str>,
        window_days: u32,
    ) -> Result<i64, PamError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signal_values (signal_name, value, country, computed_at, window_days)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![signal_name, value, country, crate::models::now_iso(), window_days],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append-only. `monte_carlo` carries `(mean, low, high)` when the
    /// evaluation sampled.
    pub fn store_hypothesis_evaluation(
        &self,
        hypothesis_name: &str,
        probability: f64,
        country: Option<&str>,
        monte_carlo: Option<(f64, f64, f64)>,
    ) -> Result<i64, PamError> {
        let (mc_mean, mc_low, mc_high) = match monte_carlo {
            Some((mean, low, high)) => (Some(mean), Some(low), Some(high)),
            None => (None, None, None),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hypothesis_evaluations
             (hypothesis_name, probability, country, monte_carlo_mean, monte_carlo_low, monte_carlo_high, evaluated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                hypothesis_name,
                probability,
                country,
                mc_mean,
                mc_low,
                mc_high,
                crate::models::now_iso()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Upsert per-source fetch bookkeeping. A success clears `last_error`.
    pub fn update_source_status(
        &self,
        source_name: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), PamError> {
        let now = crate::models::now_iso();
        let last_success = success.then(|| now.clone());
        let error_increment: i64 = if success { 0 } else { 1 };
        let last_error = if success { None } else { error };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO source_status
             (source_name, last_fetch_at, last_success_at, fetch_count, error_count, last_error)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT(source_name) DO UPDATE SET
                last_fetch_at = excluded.last_fetch_at,
                last_success_at = COALESCE(excluded.last_success_at, last_success_at),
                fetch_count = fetch_count + 1,
                error_count = error_count + ?4,
                last_error = CASE WHEN ?4 > 0 THEN excluded.last_error ELSE NULL END",
            params![source_name, now, last_success, error_increment, last_error],
        )?;
        Ok(())
    }

    pub fn get_feed_items(
        &self,
        source_name: Option<&str>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<FeedItemRecord>, PamError> {
        let cutoff = cutoff_iso(days);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, source_name, url, title, summary, published, fetched_at, content_hash
             FROM feed_items
             WHERE (?1 IS NULL OR source_name = ?1) AND fetched_at >= ?2
             ORDER BY fetched_at DESC, id DESC
             LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(params![source_name, cutoff, limit as i64], |row| {
                Ok(FeedItemRecord {
                    id: row.get(0)?,
                    source_name: row.get(1)?,
                    url: row.get(2)?,
                    title: row.get(3)?,
                    summary: row.get(4)?,
                    published_raw: row.get(5)?,
                    fetched_at: row.get(6)?,
                    content_hash: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_signal_history(
        &self,
        signal_name: &str,
        days: u32,
        country: Option<&str>,
    ) -> Result<Vec<SignalValueRecord>, PamError> {
        let cutoff = cutoff_iso(days);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, signal_name, value, country, computed_at, window_days
             FROM signal_values
             WHERE signal_name = ?1 AND computed_at >= ?2
               AND (?3 IS NULL OR country = ?3)
             ORDER BY computed_at DESC, id DESC",
        )?;

        let rows = stmt
            .query_map(params![signal_name, cutoff, country], |row| {
                Ok(SignalValueRecord {
                    id: row.get(0)?,
                    signal_name: row.get(1)?,
                    value: row.get(2)?,
                    country: row.get(3)?,
                    computed_at: row.get(4)?,
                    window_days: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_hypothesis_history(
        &self,
        hypothesis_name: &str,
        days: u32,
        country: Option<&str>,
    ) -> Result<Vec<HypothesisEvalRecord>, PamError> {
        let cutoff = cutoff_iso(days);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, hypothesis_name, probability, country,
                    monte_carlo_mean, monte_carlo_low, monte_carlo_high, evaluated_at
             FROM hypothesis_evaluations
             WHERE hypothesis_name = ?1 AND evaluated_at >= ?2
               AND (?3 IS NULL OR country = ?3)
             ORDER BY evaluated_at DESC, id DESC",
        )?;

        let rows = stmt
            .query_map(params![hypothesis_name, cutoff, country], |row| {
                Ok(HypothesisEvalRecord {
                    id: row.get(0)?,
                    hypothesis_name: row.get(1)?,
                    probability: row.get(2)?,
                    country: row.get(3)?,
                    monte_carlo_mean: row.get(4)?,
                    monte_carlo_low: row.get(5)?,
                    monte_carlo_high: row.get(6)?,
                    evaluated_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_source_status(&self) -> Result<Vec<SourceStatusRecord>, PamError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT source_name, last_fetch_at, last_success_at, fetch_count, error_count, last_error
             FROM source_status ORDER BY source_name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SourceStatusRecord {
                    source_name: row.get(0)?,
                    last_fetch_at: row.get(1)?,
                    last_success_at: row.get(2)?,
                    fetch_count: row.get(3)?,
                    error_count: row.get(4)?,
                    last_error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows older than `now − days` across the three historical
    /// tables, returning per-table counts.
    pub fn cleanup_old_data(&self, days: u32) -> Result<CleanupCounts, PamError> {
        let cutoff = cutoff_iso(days);
        let conn = self.conn.lock();

        let feed_items = conn.execute(
            "DELETE FROM feed_items WHERE fetched_at < ?1",
            params![cutoff],
        )?;
        let signals = conn.execute(
            "DELETE FROM signal_values WHERE computed_at < ?1",
            params![cutoff],
        )?;
        let evaluations = conn.execute(
            "DELETE FROM hypothesis_evaluations WHERE evaluated_at < ?1",
            params![cutoff],
        )?;

        info!(feed_items, signals, evaluations, days, "retention cleanup done");
        Ok(CleanupCounts {
            feed_items,
            signals,
            evaluations,
        })
    }

    /// Serialize feed items and source status to a JSON file. The write is
    /// atomic: a sibling tempfile is renamed into place.
    pub fn export_to_json(&self, path: &Path, days: u32) -> Result<(), PamError> {
        let items = self.get_feed_items(None, days, usize::MAX / 2)?;
        let status = self.get_source_status()?;

        let doc = serde_json::json!({
            "feed_items": items,
            "source_status": status,
            "exported_at": crate::models::now_iso(),
        });
        let raw = serde_json::to_string_pretty(&doc)
            .map_err(|e| PamError::Internal(format!("export serialization failed: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| PamError::Internal(format!("export write failed: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| PamError::Internal(format!("export rename failed: {e}")))?;

        info!(path = %path.display(), items = items.len(), "exported data");
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, PamError> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };

        let items_by_source = {
            let mut stmt = conn.prepare_cached(
                "SELECT source_name, COUNT(*) FROM feed_items
                 GROUP BY source_name ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        Ok(StoreStats {
            feed_items: count("feed_items")?,
            signal_values: count("signal_values")?,
            evaluations: count("hypothesis_evaluations")?,
            audit_events: count("audit_log")?,
            items_by_source,
        })
    }

    // --- audit log rows (component API lives in crate::audit) ---

    pub fn append_audit_event(
        &self,
        event_type: &str,
        principal_id: Option<&str>,
        action: &str,
        resource: &str,
        result: AuditResult,
        details: &serde_json::Value,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<i64, PamError> {
        let details_json = details.to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log
             (ts, event_type, principal_id, action, resource, result, details, ip_address, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                crate::models::now_iso(),
                event_type,
                principal_id,
                action,
                resource,
                result.as_str(),
                details_json,
                ip_address,
                user_agent
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn query_audit_events(
        &self,
        principal_id: Option<&str>,
        event_type: Option<&str>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<AuditEventRecord>, PamError> {
        let cutoff = cutoff_iso(days);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, event_type, principal_id, action, resource, result, details, ip_address, user_agent
             FROM audit_log
             WHERE ts >= ?1
               AND (?2 IS NULL OR principal_id = ?2)
               AND (?3 IS NULL OR event_type = ?3)
             ORDER BY ts DESC, id DESC
             LIMIT ?4",
        )?;

        let rows = stmt
            .query_map(
                params![cutoff, principal_id, event_type, limit as i64],
                |row| {
                    let result: String = row.get(6)?;
                    let details: Option<String> = row.get(7)?;
                    Ok(AuditEventRecord {
                        id: row.get(0)?,
                        ts: row.get(1)?,
                        event_type: row.get(2)?,
                        principal_id: row.get(3)?,
                        action: row.get(4)?,
                        resource: row.get(5)?,
                        result: match result.as_str() {
                            "failure" => AuditResult::Failure,
                            "denied" => AuditResult::Denied,
                            _ => AuditResult::Success,
                        },
                        details: details
                            .and_then(|d| serde_json::from_str(&d).ok())
                            .unwrap_or(serde_json::Value::Null),
                        ip_address: row.get(8)?,
                        user_agent: row.get(9)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Right to erasure: null out principal identifiers without deleting
    /// the events themselves. Returns affected rows.
    pub fn erase_audit_principal(&self, principal_id: &str) -> Result<usize, PamError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE audit_log
             SET principal_id = NULL, ip_address = NULL, user_agent = NULL
             WHERE principal_id = ?1",
            params![principal_id],
        )?;
        Ok(changed)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<Store> {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn feed_item_ingest_is_idempotent() {
        let store = store();
        let first = store
            .store_feed_item("s1", "https://a/feed", "War latest", "details", Some("today"))
            .unwrap();
        let second = store
            .store_feed_item("s1", "https://a/feed", "War latest", "details", Some("today"))
            .unwrap();
        assert_eq!(first, second);

        let items = store.get_feed_items(Some("s1"), 7, 100).unwrap();
        assert_eq!(items.len(), 1);

        // Same content under a different source is a distinct row.
        let other = store
            .store_feed_item("s2", "https://b/feed", "War latest", "details", None)
            .unwrap();
        assert_ne!(other, first);
    }

    #[test]
    fn signal_history_is_append_only_and_filtered() {
        let store = store();
        store.store_signal_value("border_clashes", 0.4, None, 7).unwrap();
        store.store_signal_value("border_clashes", 0.6, None, 7).unwrap();
        store
            .store_signal_value("border_clashes", 0.9, Some("Ukraine"), 7)
            .unwrap();
        store.store_signal_value("unrelated", 0.1, None, 7).unwrap();

        let all = store.get_signal_history("border_clashes", 7, None).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first.
        assert!(all[0].computed_at >= all[1].computed_at);

        let country = store
            .get_signal_history("border_clashes", 7, Some("Ukraine"))
            .unwrap();
        assert_eq!(country.len(), 1);
        assert!((country[0].value - 0.9).abs() < 1e-12);
    }

    #[test]
    fn evaluation_rows_carry_monte_carlo_fields_only_when_sampled() {
        let store = store();
        store
            .store_hypothesis_evaluation("global_war_risk", 0.11, None, None)
            .unwrap();
        store
            .store_hypothesis_evaluation("global_war_risk", 0.12, None, Some((0.13, 0.05, 0.3)))
            .unwrap();

        let history = store
            .get_hypothesis_history("global_war_risk", 7, None)
            .unwrap();
        assert_eq!(history.len(), 2);
        let with_mc = history.iter().find(|h| h.monte_carlo_mean.is_some()).unwrap();
        assert_eq!(with_mc.monte_carlo_low, Some(0.05));
        let without = history.iter().find(|h| h.monte_carlo_mean.is_none()).unwrap();
        assert!(without.monte_carlo_high.is_none());
    }

    #[test]
    fn source_status_upserts_and_clears_errors_on_success() {
        let store = store();
        store
            .update_source_status("reuters_world", false, Some("timeout"))
            .unwrap();
        store
            .update_source_status("reuters_world", false, Some("http status 500"))
            .unwrap();

        let status = &store.get_source_status().unwrap()[0];
        assert_eq!(status.fetch_count, 2);
        assert_eq!(status.error_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("http status 500"));
        assert!(status.last_success_at.is_none());

        store.update_source_status("reuters_world", true, None).unwrap();
        let status = &store.get_source_status().unwrap()[0];
        assert_eq!(status.fetch_count, 3);
        assert_eq!(status.error_count, 2);
        assert!(status.last_error.is_none());
        assert!(status.last_success_at.is_some());
    }

    #[test]
    fn cleanup_reports_deleted_counts() {
        let store = store();
        store
            .store_feed_item("s1", "https://a", "t", "s", None)
            .unwrap();
        store.store_signal_value("sig", 0.5, None, 7).unwrap();
        store
            .store_hypothesis_evaluation("h", 0.2, None, None)
            .unwrap();

        // days = 0 removes everything older than now.
        let counts = store.cleanup_old_data(0).unwrap();
        assert_eq!(counts.feed_items, 1);
        assert_eq!(counts.signals, 1);
        assert_eq!(counts.evaluations, 1);

        assert!(store.get_feed_items(None, 365, 10).unwrap().is_empty());
        assert!(store.get_signal_history("sig", 365, None).unwrap().is_empty());
    }

    #[test]
    fn export_writes_atomic_json_document() {
        let store = store();
        store
            .store_feed_item("s1", "https://a", "title", "summary", None)
            .unwrap();
        store.update_source_status("s1", true, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        store.export_to_json(&path, 7).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["feed_items"].as_array().unwrap().len(), 1);
        assert_eq!(doc["source_status"].as_array().unwrap().len(), 1);
        assert!(doc["exported_at"].as_str().unwrap().ends_with('Z'));
        // No tempfile left behind.
        assert!(!dir.path().join("export.json.tmp").exists());
    }

    #[test]
    fn audit_rows_query_and_erase() {
        let store = store();
        store
            .append_audit_event(
                "api_access",
                Some("key-1"),
                "evaluate",
                "scenario:global_war_risk",
                AuditResult::Success,
                &serde_json::json!({"simulate": 0}),
                Some("203.0.113.9"),
                Some("curl/8"),
            )
            .unwrap();
        store
            .append_audit_event(
                "auth",
                Some("key-2"),
                "login",
                "session",
                AuditResult::Denied,
                &serde_json::Value::Null,
                None,
                None,
            )
            .unwrap();

        let all = store.query_audit_events(None, None, 7, 50).unwrap();
        assert_eq!(all.len(), 2);
        let by_principal = store
            .query_audit_events(Some("key-1"), None, 7, 50)
            .unwrap();
        assert_eq!(by_principal.len(), 1);
        assert_eq!(by_principal[0].details["simulate"], 0);

        let erased = store.erase_audit_principal("key-1").unwrap();
        assert_eq!(erased, 1);
        // Event retained, identifiers gone.
        let all = store.query_audit_events(None, None, 7, 50).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.principal_id.as_deref() != Some("key-1")));
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let store = store();
        let mut handles = Vec::new();
        for thread_id in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    store
                        .store_feed_item(
                            "s1",
                            "https://a",
                            &format!("title {thread_id} {i}"),
                            "body",
                            None,
                        )
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.stats().unwrap().feed_items, 100);
    }
}
