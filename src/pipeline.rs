//! Pipeline drivers used by the scheduler and the CLI: bulk re-ingestion of
//! every configured source and full-graph evaluation.

use tracing::{info, warn};

use crate::config::Config;
use crate::error::PamError;
use crate::events::change::ChangeDetector;
use crate::feed::parse_feed;
use crate::fetcher::{FetchRequest, SecureFetcher, DEFAULT_MAX_CONCURRENT};
use crate::signals::evaluator::{Evaluation, HypothesisEvaluator};
use crate::store::async_store::AsyncStore;

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub sources: usize,
    pub fetched: usize,
    pub items: usize,
    pub updated_feeds: usize,
}

/// Fetch, parse, persist, and change-detect every configured source.
///
/// A failing source degrades to zero items for this cycle; nothing aborts
/// the sweep.
pub async fn run_ingestion_cycle(
    config: &Config,
    fetcher: &SecureFetcher,
    store: Option<&AsyncStore>,
    detector: Option<&ChangeDetector>,
) -> IngestReport {
    let requests: Vec<FetchRequest> = config
        .sources
        .iter()
        .map(|source| FetchRequest {
            source_name: source.name.clone(),
            url: source.url.clone(),
            timeout: source.timeout_duration(),
        })
        .collect();

    let mut report = IngestReport {
        sources: requests.len(),
        ..Default::default()
    };

    let results = fetcher.fetch_all(requests, DEFAULT_MAX_CONCURRENT).await;

    for source in &config.sources {
        let Some(result) = results.get(&source.name) else {
            continue;
        };

        if !result.ok {
            if let Some(store) = store {
                if let Err(e) = store
                    .update_source_status(source.name.clone(), false, result.error.clone())
                    .await
                {
                    warn!(source = %source.name, error = %e, "source status update failed");
                }
            }
            continue;
        }
        report.fetched += 1;

        let Some(kind) = source.feed_kind() else {
            continue;
        };
        let items = parse_feed(kind, result.data.as_deref().unwrap_or_default());
        report.items += items.len();

        if let Some(store) = store {
            if let Err(e) = store
                .update_source_status(source.name.clone(), true, None)
                .await
            {
                warn!(source = %source.name, error = %e, "source status update failed");
            }
            if let Err(e) = store
                .store_parsed_items(source.name.clone(), source.url.clone(), items.clone())
                .await
            {
                warn!(source = %source.name, error = %e, "feed item persist failed");
            }
        }

        if let Some(detector) = detector {
            if detector.process_feed(&source.name, &source.url, &items).await {
                report.updated_feeds += 1;
            }
        }
    }

    info!(
        sources = report.sources,
        fetched = report.fetched,
        items = report.items,
        updated = report.updated_feeds,
        "ingestion cycle complete"
    );
    report
}

/// Evaluate every configured hypothesis in declaration order.
pub async fn evaluate_all(
    evaluator: &HypothesisEvaluator,
    config: &Config,
    country: Option<&str>,
    simulate_n: usize,
) -> Vec<(String, Result<Evaluation, PamError>)> {
    let mut results = Vec::with_capacity(config.hypotheses.len());
    for hypothesis in &config.hypotheses {
        let result = evaluator
            .evaluate(&hypothesis.name, country, simulate_n)
            .await;
        if let Err(e) = &result {
            warn!(hypothesis = %hypothesis.name, error = %e, "evaluation failed");
        }
        results.push((hypothesis.name.clone(), result));
    }
    results
}
