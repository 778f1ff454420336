//! Per-source change detection over parsed feed content.
//!
//! The hash covers the first ten items' title and summary; the first sight
//! of a source establishes the baseline without emitting an event.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::events::bus::EventBus;
use crate::models::{Event, ParsedItem};

const HASHED_ITEMS: usize = 10;
const EVENT_ITEMS: usize = 5;

pub struct ChangeDetector {
    bus: Arc<EventBus>,
    last_hashes: Mutex<HashMap<String, String>>,
}

impl ChangeDetector {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            last_hashes: Mutex::new(HashMap::new()),
        }
    }

    fn feed_hash(items: &[ParsedItem]) -> String {
        let content: String = items
            .iter()
            .take(HASHED_ITEMS)
            .map(|item| format!("{}{}", item.title, item.summary))
            .collect();
        format!("{:x}", md5::compute(content))
    }

    /// Compare `items` to the prior content of `source_name`; on change,
    /// publish `feed_updated` carrying the first five items. Returns whether
    /// an event was emitted.
    pub async fn process_feed(&self, source_name: &str, url: &str, items: &[ParsedItem]) -> bool {
        if items.is_empty() {
            return false;
        }

        let current = Self::feed_hash(items);
        {
            let mut hashes = self.last_hashes.lock();
            match hashes.get(source_name) {
                None => {
                    // Baseline.
                    hashes.insert(source_name.to_string(), current);
                    return false;
                }
                Some(previous) if *previous == current => return false,
                Some(_) => {
                    hashes.insert(source_name.to_string(), current);
                }
            }
        }

        info!(source = source_name, items = items.len(), "feed updated");
        self.bus
            .publish(Event::FeedUpdated {
                source: source_name.to_string(),
                url: url.to_string(),
                item_count: items.len(),
                items: items.iter().take(EVENT_ITEMS).cloned().collect(),
            })
            .await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use parking_lot::Mutex as PlMutex;

    fn items(prefix: &str, count: usize) -> Vec<ParsedItem> {
        (0..count)
            .map(|i| ParsedItem {
                title: format!("{prefix} headline {i}"),
                summary: format!("{prefix} body {i}"),
                published_raw: String::new(),
            })
            .collect()
    }

    fn bus_with_counter() -> (Arc<EventBus>, Arc<PlMutex<Vec<usize>>>) {
        let bus = Arc::new(EventBus::new());
        let counts = Arc::new(PlMutex::new(Vec::new()));
        {
            let counts = counts.clone();
            bus.subscribe_fn(EventKind::FeedUpdated, "test", move |event| {
                if let Event::FeedUpdated { item_count, items, .. } = event {
                    assert!(items.len() <= EVENT_ITEMS);
                    counts.lock().push(item_count);
                }
            });
        }
        (bus, counts)
    }

    #[tokio::test]
    async fn baseline_then_single_event_on_change() {
        let (bus, counts) = bus_with_counter();
        let detector = ChangeDetector::new(bus);

        let first = items("x", 10);
        // First sight: baseline, no event.
        assert!(!detector.process_feed("s1", "https://a", &first).await);
        // Unchanged replay: no event.
        assert!(!detector.process_feed("s1", "https://a", &first).await);
        assert!(counts.lock().is_empty());

        // Content changes: exactly one event.
        let second = items("y", 10);
        assert!(detector.process_feed("s1", "https://a", &second).await);
        assert!(!detector.process_feed("s1", "https://a", &second).await);
        assert_eq!(*counts.lock(), vec![10]);
    }

    #[tokio::test]
    async fn sources_are_tracked_independently() {
        let (bus, counts) = bus_with_counter();
        let detector = ChangeDetector::new(bus);

        detector.process_feed("a", "https://a", &items("x", 3)).await;
        detector.process_feed("b", "https://b", &items("x", 3)).await;
        // Changing source a does not disturb source b's baseline.
        assert!(detector.process_feed("a", "https://a", &items("z", 3)).await);
        assert!(!detector.process_feed("b", "https://b", &items("x", 3)).await);
        assert_eq!(counts.lock().len(), 1);
    }

    #[tokio::test]
    async fn changes_beyond_the_tenth_item_are_invisible() {
        let (bus, counts) = bus_with_counter();
        let detector = ChangeDetector::new(bus);

        let mut feed = items("x", 12);
        detector.process_feed("s", "https://a", &feed).await;
        // Only items past the hashed prefix change.
        feed[11].title = "different".into();
        assert!(!detector.process_feed("s", "https://a", &feed).await);
        assert!(counts.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_feeds_are_ignored() {
        let (bus, _counts) = bus_with_counter();
        let detector = ChangeDetector::new(bus);
        assert!(!detector.process_feed("s", "https://a", &[]).await);
    }
}
