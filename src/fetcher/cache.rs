//! TTL byte cache for fetched feeds. Entries expire lazily on read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct CacheEntry {
    value: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Thread-safe TTL cache with get/set/delete/size. Reads drop expired
/// entries in place.
pub struct TtlCache {
    default_ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Vec<u8>) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: Vec<u8>, ttl: Duration) {
        self.entries.lock().insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop every expired entry. Call from a background task.
    pub fn cleanup_expired(&self) {
        self.entries.lock().retain(|_, entry| !entry.expired());
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("feed:a", b"payload".to_vec());
        assert_eq!(cache.get("feed:a").as_deref(), Some(b"payload".as_ref()));
        assert_eq!(cache.size(), 1);

        cache.delete("feed:a");
        assert!(cache.get("feed:a").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn entries_expire_on_read() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set_with_ttl("feed:b", b"old".to_vec(), Duration::from_millis(0));
        assert!(cache.get("feed:b").is_none());
        // The expired read removed the entry.
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn cleanup_prunes_expired_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set_with_ttl("stale", b"x".to_vec(), Duration::from_millis(0));
        cache.set("fresh", b"y".to_vec());
        cache.cleanup_expired();
        assert_eq!(cache.size(), 1);
        assert!(cache.get("fresh").is_some());
    }
}
