//! Engine metrics: thread-safe counters and timers plus the derived health
//! verdict. A bounded ring of recent samples backs the windowed error-rate
//! used by the health check.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::now_iso;

const SAMPLE_RING_CAPACITY: usize = 10_000;
const HEALTH_WINDOW: Duration = Duration::from_secs(300);
const SLOW_FETCH_THRESHOLD_SECS: f64 = 30.0;

#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub counters: BTreeMap<String, u64>,
    pub timers: BTreeMap<String, TimingStats>,
}

struct Sample {
    name: String,
    at: Instant,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    timers: HashMap<String, Vec<f64>>,
    samples: VecDeque<Sample>,
}

impl Inner {
    fn push_sample(&mut self, name: &str) {
        if self.samples.len() >= SAMPLE_RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            name: name.to_string(),
            at: Instant::now(),
        });
    }
}

/// Thread-safe metrics registry, threaded through constructors rather than
/// held as a process global.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, value: u64) {
        let mut inner = self.inner.lock();
        *inner.counters.entry(name.to_string()).or_insert(0) += value;
        inner.push_sample(name);
    }

    /// Tag-carrying variant; tags only affect the emitted trace line, the
    /// counter itself is keyed by name.
    pub fn increment_tagged(&self, name: &str, source: &str) {
        tracing::trace!(metric = name, source, "counter increment");
        self.increment(name);
    }

    pub fn record_timing(&self, name: &str, duration: Duration) {
        let secs = duration.as_secs_f64();
        let mut inner = self.inner.lock();
        inner.timers.entry(name.to_string()).or_default().push(secs);
        inner.push_sample(name);
    }

    /// Scoped timer: records the elapsed time against `name` when dropped.
    pub fn start_timer<'a>(&'a self, name: &str) -> ScopedTimer<'a> {
        ScopedTimer {
            registry: self,
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Occurrences of `name` inside the trailing `window`, from the sample
    /// ring. Undercounts only if the ring has wrapped within the window.
    pub fn windowed_count(&self, name: &str, window: Duration) -> u64 {
        let inner = self.inner.lock();
        inner
            .samples
            .iter()
            .filter(|s| s.name == name && s.at.elapsed() < window)
            .count() as u64
    }

    pub fn timing_stats(&self, name: &str) -> Option<TimingStats> {
        let inner = self.inner.lock();
        let timings = inner.timers.get(name)?;
        if timings.is_empty() {
            return None;
        }
        let sum: f64 = timings.iter().sum();
        Some(TimingStats {
            count: timings.len(),
            mean: sum / timings.len() as f64,
            min: timings.iter().cloned().fold(f64::INFINITY, f64::min),
            max: timings.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            sum,
        })
    }

    pub fn summary(&self) -> MetricsSummary {
        let names: Vec<String> = {
            let inner = self.inner.lock();
            inner.timers.keys().cloned().collect()
        };

        let mut timers = BTreeMap::new();
        for name in names {
            if let Some(stats) = self.timing_stats(&name) {
                timers.insert(name, stats);
            }
        }

        let counters = self
            .inner
            .lock()
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        MetricsSummary { counters, timers }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.counters.clear();
        inner.timers.clear();
        inner.samples.clear();
    }
}

pub struct ScopedTimer<'a> {
    registry: &'a MetricsRegistry,
    name: String,
    start: Instant,
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.registry
            .record_timing(&self.name, self.start.elapsed());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: Vec<HealthCheck>,
}

/// Derive the health verdict from the metrics registry.
///
/// Unhealthy when the 5-minute HTTP error rate exceeds 0.5; degraded when
/// it is above 0.2, or when the mean feed fetch takes longer than 30 s.
pub fn health_report(metrics: &MetricsRegistry) -> HealthReport {
    let mut checks = Vec::new();

    let errors = metrics.windowed_count("http_errors", HEALTH_WINDOW);
    let successes = metrics.windowed_count("http_success", HEALTH_WINDOW);
    let total = errors + successes;

    if total > 0 {
        let error_rate = errors as f64 / total as f64;
        let (status, message) = if error_rate > 0.5 {
            (
                HealthStatus::Unhealthy,
                format!("high error rate: {:.1}%", error_rate * 100.0),
            )
        } else if error_rate > 0.2 {
            (
                HealthStatus::Degraded,
                format!("elevated error rate: {:.1}%", error_rate * 100.0),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("error rate acceptable: {:.1}%", error_rate * 100.0),
            )
        };
        checks.push(HealthCheck {
            name: "http_error_rate".into(),
            status,
            message,
        });
    } else {
        checks.push(HealthCheck {
            name: "http_error_rate".into(),
            status: HealthStatus::Healthy,
            message: "no recent requests".into(),
        });
    }

    if let Some(stats) = metrics.timing_stats("feed_fetch") {
        let (status, message) = if stats.mean > SLOW_FETCH_THRESHOLD_SECS {
            (
                HealthStatus::Degraded,
                format!("slow feed fetching: {:.1}s average", stats.mean),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("feed fetch performance acceptable: {:.2}s average", stats.mean),
            )
        };
        checks.push(HealthCheck {
            name: "feed_fetch_performance".into(),
            status,
            message,
        });
    }

    let status = if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        timestamp: now_iso(),
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment("http_success");
        metrics.increment("http_success");
        metrics.increment_by("http_errors", 3);
        assert_eq!(metrics.counter("http_success"), 2);
        assert_eq!(metrics.counter("http_errors"), 3);
        assert_eq!(metrics.counter("unknown"), 0);
    }

    #[test]
    fn timing_stats_cover_min_mean_max() {
        let metrics = MetricsRegistry::new();
        metrics.record_timing("feed_fetch", Duration::from_secs(1));
        metrics.record_timing("feed_fetch", Duration::from_secs(3));

        let stats = metrics.timing_stats("feed_fetch").unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 2.0).abs() < 1e-9);
        assert!((stats.min - 1.0).abs() < 1e-9);
        assert!((stats.max - 3.0).abs() < 1e-9);
        assert!((stats.sum - 4.0).abs() < 1e-9);
    }

    #[test]
    fn summary_covers_counters_and_timers() {
        let metrics = MetricsRegistry::new();
        metrics.increment("http_success");
        metrics.increment("http_success");
        metrics.record_timing("feed_fetch", Duration::from_secs(2));

        let summary = metrics.summary();
        assert_eq!(summary.counters["http_success"], 2);
        assert_eq!(summary.timers["feed_fetch"].count, 1);
        assert!(serde_json::to_string(&summary).is_ok());
    }

    #[test]
    fn scoped_timer_records_on_drop() {
        let metrics = MetricsRegistry::new();
        {
            let _timer = metrics.start_timer("op");
        }
        assert_eq!(metrics.timing_stats("op").unwrap().count, 1);
    }

    #[test]
    fn health_unhealthy_on_high_error_rate() {
        let metrics = MetricsRegistry::new();
        for _ in 0..6 {
            metrics.increment("http_errors");
        }
        for _ in 0..4 {
            metrics.increment("http_success");
        }
        let report = health_report(&metrics);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn health_degraded_on_elevated_error_rate() {
        let metrics = MetricsRegistry::new();
        for _ in 0..3 {
            metrics.increment("http_errors");
        }
        for _ in 0..7 {
            metrics.increment("http_success");
        }
        assert_eq!(health_report(&metrics).status, HealthStatus::Degraded);
    }

    #[test]
    fn health_degraded_on_slow_fetches() {
        let metrics = MetricsRegistry::new();
        metrics.increment("http_success");
        metrics.record_timing("feed_fetch", Duration::from_secs(45));
        let report = health_report(&metrics);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report
            .checks
            .iter()
            .any(|c| c.name == "feed_fetch_performance" && c.status == HealthStatus::Degraded));
    }

    #[test]
    fn health_healthy_when_quiet() {
        let metrics = MetricsRegistry::new();
        assert_eq!(health_report(&metrics).status, HealthStatus::Healthy);
    }
}
