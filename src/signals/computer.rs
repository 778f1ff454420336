//! Signal computation: keyword matching over a time window, per-source
//! normalization, and aggregation across bound sources.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::PamError;
use crate::events::bus::EventBus;
use crate::feed::dates;
use crate::feed::parse_feed;
use crate::fetcher::SecureFetcher;
use crate::models::{now_iso, Event, ParsedItem};
use crate::store::async_store::AsyncStore;

/// Denominator of the √-dampening: twenty matching items saturate a source.
const HIT_NORMALIZER: f64 = 20.0;

/// Count items matching any keyword inside the window and dampen with a
/// square root so one prolific feed cannot dominate:
/// `min(sqrt(hits) / sqrt(20), 1.0)`.
pub fn score_items(
    items: &[ParsedItem],
    keywords: &[String],
    window_days: u32,
    now: DateTime<Utc>,
) -> f64 {
    if items.is_empty() || keywords.is_empty() {
        return 0.0;
    }

    let mut hits = 0usize;
    for item in items {
        let text = format!("{} {}", item.title, item.summary).to_lowercase();
        if !keywords.iter().any(|k| text.contains(k.as_str())) {
            continue;
        }
        let published = dates::parse_published(&item.published_raw, window_days, now);
        if dates::within_window(published, window_days, now) {
            hits += 1;
        }
    }

    ((hits as f64).sqrt() / HIT_NORMALIZER.sqrt()).min(1.0)
}

/// Computes named signals against the configured graph. The store and bus
/// are optional so the computer also works in one-shot CLI mode and in
/// tests without persistence.
pub struct SignalComputer {
    config: Arc<Config>,
    fetcher: Arc<SecureFetcher>,
    store: Option<AsyncStore>,
    bus: Option<Arc<EventBus>>,
}

impl SignalComputer {
    pub fn new(config: Arc<Config>, fetcher: Arc<SecureFetcher>) -> Self {
        Self {
            config,
            fetcher,
            store: None,
            bus: None,
        }
    }

    pub fn with_store(mut self, store: AsyncStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The effective keyword list for a signal: the union of its keyword
    /// sets, case-folded and trimmed, plus the country when supplied.
    fn effective_keywords(&self, set_names: &[String], country: Option<&str>) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for set_name in set_names {
            if let Some(phrases) = self.config.keyword_sets.get(set_name) {
                for phrase in phrases {
                    let folded = phrase.trim().to_lowercase();
                    if !folded.is_empty() {
                        keywords.push(folded);
                    }
                }
            }
        }
        if let Some(country) = country {
            let folded = country.trim().to_lowercase();
            if !folded.is_empty() {
                keywords.push(folded);
            }
        }
        keywords
    }

    /// Compute one signal value in `[0, cap]`.
    ///
    /// A failed source contributes 0 and never aborts the rest. When the
    /// store is bound, each computation persists the clamped value, upserts
    /// the parsed items, and updates per-source status.
    pub async fn compute_signal(
        &self,
        signal_name: &str,
        country: Option<&str>,
    ) -> Result<f64, PamError> {
        let signal = self
            .config
            .signal(signal_name)
            .ok_or_else(|| PamError::not_found("signal", signal_name))?;

        let binding = self.config.binding(signal_name);
        let (source_names, keyword_sets, window_days) = match binding {
            Some(b) => (b.sources.clone(), b.keyword_sets.clone(), b.window_days),
            None => (Vec::new(), Vec::new(), 7),
        };

        let keywords = self.effective_keywords(&keyword_sets, country);
        let now = Utc::now();
        let mut per_source: Vec<f64> = Vec::new();

        for source_name in &source_names {
            let Some(source) = self.config.source(source_name) else {
                continue;
            };
            let Some(kind) = source.feed_kind() else {
                continue;
            };

            let result = self
                .fetcher
                .fetch(source_name, &source.url, source.timeout_duration())
                .await;

            if !result.ok {
                if let Some(store) = &self.store {
                    if let Err(e) = store
                        .update_source_status(source_name.clone(), false, result.error.clone())
                        .await
                    {
                        warn!(source = %source_name, error = %e, "source status update failed");
                    }
                }
                per_source.push(0.0);
                continue;
            }

            let items = parse_feed(kind, result.data.as_deref().unwrap_or_default());
            debug!(source = %source_name, items = items.len(), "parsed feed");

            if let Some(store) = &self.store {
                if let Err(e) = store
                    .update_source_status(source_name.clone(), true, None)
                    .await
                {
                    warn!(source = %source_name, error = %e, "source status update failed");
                }
                if let Err(e) = store
                    .store_parsed_items(source_name.clone(), source.url.clone(), items.clone())
                    .await
                {
                    warn!(source = %source_name, error = %e, "feed item persist failed");
                }
            }

            per_source.push(score_items(&items, &keywords, window_days, now));
        }

        let aggregated = if per_source.is_empty() {
            0.0
        } else if signal.aggregation == "max" {
            per_source.iter().cloned().fold(0.0, f64::max)
        } else {
            per_source.iter().sum()
        };
        let value = aggregated.clamp(0.0, signal.cap);

        if let Some(store) = &self.store {
            if let Err(e) = store
                .store_signal_value(
                    signal_name.to_string(),
                    value,
                    country.map(str::to_string),
                    window_days,
                )
                .await
            {
                warn!(signal = signal_name, error = %e, "signal value persist failed");
            }
        }

        if let Some(bus) = &self.bus {
            bus.publish(Event::SignalUpdate {
                signal: signal_name.to_string(),
                value,
                scenario: None,
                country: country.map(str::to_string),
                timestamp: now_iso(),
            })
            .await;
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dated_items(count: usize, text: &str, published: &str) -> Vec<ParsedItem> {
        (0..count)
            .map(|i| ParsedItem {
                title: format!("{text} item {i}"),
                summary: "context".into(),
                published_raw: published.to_string(),
            })
            .collect()
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn four_hits_score_root_damped() {
        let now = Utc::now();
        let items = dated_items(4, "war looms", &now.to_rfc2822());
        let score = score_items(&items, &kw(&["war"]), 7, now);
        assert!((score - 2.0 / 20.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn twenty_hits_saturate_at_one() {
        let now = Utc::now();
        let items = dated_items(20, "war everywhere", &now.to_rfc2822());
        let score = score_items(&items, &kw(&["war"]), 7, now);
        assert!((score - 1.0).abs() < 1e-12);

        let more = dated_items(50, "war everywhere", &now.to_rfc2822());
        assert!((score_items(&more, &kw(&["war"]), 7, now) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nine_hits_match_expected_fraction() {
        let now = Utc::now();
        let items = dated_items(9, "shelling reported", &now.to_rfc2822());
        let score = score_items(&items, &kw(&["shelling"]), 7, now);
        assert!((score - 3.0 / 20.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let now = Utc::now();
        let items = vec![ParsedItem {
            title: "MOBILIZATION Ordered".into(),
            summary: String::new(),
            published_raw: now.to_rfc2822(),
        }];
        assert!(score_items(&items, &kw(&["mobilization"]), 7, now) > 0.0);
        assert_eq!(score_items(&items, &kw(&["ceasefire"]), 7, now), 0.0);
    }

    #[test]
    fn out_of_window_items_do_not_count() {
        let now = Utc::now();
        let old = (now - chrono::Duration::days(30)).to_rfc2822();
        let items = dated_items(5, "war drags on", &old);
        assert_eq!(score_items(&items, &kw(&["war"]), 7, now), 0.0);
    }

    #[test]
    fn undated_items_are_admitted() {
        let now = Utc::now();
        let items = dated_items(4, "war update", "");
        let score = score_items(&items, &kw(&["war"]), 7, now);
        assert!((score - 2.0 / 20.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_score_zero() {
        let now = Utc::now();
        assert_eq!(score_items(&[], &kw(&["war"]), 7, now), 0.0);
        let items = dated_items(3, "war", &now.to_rfc2822());
        assert_eq!(score_items(&items, &[], 7, now), 0.0);
    }
}
