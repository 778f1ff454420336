//! Periodic job scheduling on the tokio runtime.
//!
//! One task per job id; re-scheduling a job id cancels the prior task. A
//! job whose handler errors is logged and still gets its next tick.
//! Cancellation aborts the task, which interrupts the handler at its next
//! suspension point.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub interval_secs: u64,
    pub last_run: Option<String>,
    pub running: bool,
}

struct JobEntry {
    interval: Duration,
    last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct JobScheduler {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `interval`. An existing job under the same id is
    /// cancelled first.
    pub fn schedule_every<F, Fut>(
        &self,
        job_id: &str,
        interval: Duration,
        job: F,
        start_immediately: bool,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut jobs = self.jobs.lock();
        if let Some(previous) = jobs.remove(job_id) {
            warn!(job_id, "job already scheduled, cancelling previous");
            previous.handle.abort();
        }

        let last_run = Arc::new(Mutex::new(None));
        let task_last_run = last_run.clone();
        let task_job_id = job_id.to_string();

        let handle = tokio::spawn(async move {
            if !start_immediately {
                tokio::time::sleep(interval).await;
            }
            loop {
                info!(job_id = %task_job_id, "running scheduled job");
                *task_last_run.lock() = Some(Utc::now());
                if let Err(e) = job().await {
                    error!(job_id = %task_job_id, error = %e, "scheduled job failed");
                }
                tokio::time::sleep(interval).await;
            }
        });

        info!(job_id, interval_secs = interval.as_secs(), "scheduled job");
        jobs.insert(
            job_id.to_string(),
            JobEntry {
                interval,
                last_run,
                handle,
            },
        );
    }

    pub fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.lock().remove(job_id) {
            Some(entry) => {
                entry.handle.abort();
                info!(job_id, "cancelled job");
                true
            }
            None => false,
        }
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        let jobs = self.jobs.lock();
        let entry = jobs.get(job_id)?;
        let status = JobStatus {
            job_id: job_id.to_string(),
            interval_secs: entry.interval.as_secs(),
            last_run: entry
                .last_run
                .lock()
                .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
            running: !entry.handle.is_finished(),
        };
        Some(status)
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// Abort every job. Called on shutdown.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (job_id, entry) in jobs.drain() {
            entry.handle.abort();
            info!(job_id, "cancelled job");
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        for (_, entry) in self.jobs.lock().drain() {
            entry.handle.abort();
        }
    }
}

/// Database backups: byte-for-byte copies of the store file under a
/// timestamped name, keeping only the most recent `keep_count`.
pub struct BackupManager {
    backup_dir: PathBuf,
    keep_count: usize,
}

impl BackupManager {
    pub const DEFAULT_KEEP: usize = 7;

    pub fn new(backup_dir: impl Into<PathBuf>, keep_count: usize) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            keep_count,
        }
    }

    /// Copy the database file to `pam_backup_YYYYMMDD_HHMMSS.db` and prune
    /// older copies.
    pub async fn backup_database(&self, db_path: &Path) -> anyhow::Result<PathBuf> {
        let backup_dir = self.backup_dir.clone();
        let keep_count = self.keep_count;
        let db_path = db_path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&backup_dir)?;
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let backup_path = backup_dir.join(format!("pam_backup_{timestamp}.db"));
            std::fs::copy(&db_path, &backup_path)?;
            info!(path = %backup_path.display(), "database backed up");

            Self::prune(&backup_dir, keep_count)?;
            Ok(backup_path)
        })
        .await?
    }

    /// Remove all but the newest `keep_count` backups. The timestamp in the
    /// name sorts lexicographically, so the name is the age.
    fn prune(backup_dir: &Path, keep_count: usize) -> anyhow::Result<()> {
        let mut backups: Vec<PathBuf> = std::fs::read_dir(backup_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("pam_backup_") && n.ends_with(".db"))
                    .unwrap_or(false)
            })
            .collect();

        backups.sort();
        backups.reverse();
        for stale in backups.into_iter().skip(keep_count) {
            std::fs::remove_file(&stale)?;
            info!(path = %stale.display(), "deleted old backup");
        }
        Ok(())
    }
}

/// Schedule the periodic backup job.
pub fn schedule_backups(
    scheduler: &JobScheduler,
    manager: Arc<BackupManager>,
    db_path: PathBuf,
    interval: Duration,
) {
    scheduler.schedule_every(
        "database_backup",
        interval,
        move || {
            let manager = manager.clone();
            let db_path = db_path.clone();
            async move {
                manager.backup_database(&db_path).await?;
                Ok(())
            }
        },
        false,
    );
}

/// Schedule the retention cleanup job.
pub fn schedule_retention(
    scheduler: &JobScheduler,
    store: Arc<Store>,
    retention_days: u32,
    interval: Duration,
) {
    scheduler.schedule_every(
        "retention_cleanup",
        interval,
        move || {
            let store = store.clone();
            async move {
                let counts =
                    tokio::task::spawn_blocking(move || store.cleanup_old_data(retention_days))
                        .await??;
                info!(
                    feed_items = counts.feed_items,
                    signals = counts.signals,
                    evaluations = counts.evaluations,
                    "retention job done"
                );
                Ok(())
            }
        },
        false,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn failing_handler_still_receives_its_next_tick() {
        let scheduler = JobScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        scheduler.schedule_every(
            "flaky",
            Duration::from_millis(10),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        anyhow::bail!("first run fails")
                    }
                    Ok(())
                }
            },
            true,
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2, "job must survive a failure");

        let status = scheduler.job_status("flaky").unwrap();
        assert!(status.running);
        assert!(status.last_run.is_some());
    }

    #[tokio::test]
    async fn rescheduling_cancels_the_prior_series() {
        let scheduler = JobScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        {
            let first = first.clone();
            scheduler.schedule_every(
                "job",
                Duration::from_millis(10),
                move || {
                    first.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                true,
            );
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        {
            let second = second.clone();
            scheduler.schedule_every(
                "job",
                Duration::from_millis(10),
                move || {
                    second.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                true,
            );
        }

        let frozen = first.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(first.load(Ordering::SeqCst), frozen, "old series must stop");
        assert!(second.load(Ordering::SeqCst) >= 1);
        assert_eq!(scheduler.job_ids(), vec!["job".to_string()]);
    }

    #[tokio::test]
    async fn cancel_stops_the_job() {
        let scheduler = JobScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            scheduler.schedule_every(
                "short",
                Duration::from_millis(10),
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                true,
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(scheduler.cancel("short"));
        assert!(scheduler.job_status("short").is_none());

        let frozen = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), frozen);
        assert!(!scheduler.cancel("short"));
    }

    #[tokio::test]
    async fn backups_are_copies_and_pruned_to_keep_count() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("pam_data.db");
        std::fs::write(&db_path, b"database bytes").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), 2);
        let mut created = Vec::new();
        for _ in 0..3 {
            created.push(manager.backup_database(&db_path).await.unwrap());
            // Distinct timestamps, second resolution.
            tokio::time::sleep(Duration::from_millis(1100)).await;
        }

        let remaining: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(remaining.len(), 2);

        let name = created[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("pam_backup_"));
        assert!(name.ends_with(".db"));
        // Byte-for-byte copy.
        assert_eq!(std::fs::read(&created[2]).unwrap(), b"database bytes");
    }
}
