//! Per-host request throttling: a sliding 60-second window of request
//! timestamps per hostname, checked before any outbound call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const DEFAULT_REQUESTS_PER_WINDOW: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window throttle keyed by hostname. Monotonic clock.
pub struct HostThrottle {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl HostThrottle {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt against `host`. Returns false when the host has
    /// exhausted its window; the attempt is only recorded when admitted.
    pub fn try_acquire(&self, host: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock();
        let window = self.window;
        let timestamps = requests.entry(host.to_string()).or_default();
        timestamps.retain(|ts| now.duration_since(*ts) < window);

        if timestamps.len() >= self.max_requests {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Drop hosts with no recent requests. Call from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.window;
        self.requests.lock().retain(|_, timestamps| {
            timestamps.retain(|ts| now.duration_since(*ts) < window);
            !timestamps.is_empty()
        });
    }
}

impl Default for HostThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_WINDOW, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let throttle = HostThrottle::new(10, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(throttle.try_acquire("feeds.reuters.com"));
        }
        assert!(!throttle.try_acquire("feeds.reuters.com"));
    }

    #[test]
    fn hosts_are_throttled_independently() {
        let throttle = HostThrottle::new(2, Duration::from_secs(60));
        assert!(throttle.try_acquire("a.example"));
        assert!(throttle.try_acquire("a.example"));
        assert!(!throttle.try_acquire("a.example"));
        assert!(throttle.try_acquire("b.example"));
    }

    #[test]
    fn window_expiry_readmits() {
        let throttle = HostThrottle::new(1, Duration::from_millis(0));
        assert!(throttle.try_acquire("a.example"));
        // Zero-length window: the first timestamp has already aged out.
        assert!(throttle.try_acquire("a.example"));
    }

    #[test]
    fn cleanup_drops_idle_hosts() {
        let throttle = HostThrottle::new(1, Duration::from_millis(0));
        throttle.try_acquire("a.example");
        throttle.cleanup();
        assert!(throttle.requests.lock().is_empty());
    }
}
