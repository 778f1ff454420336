//! Async adapter over the synchronous store. Same contract, same file;
//! blocking SQLite work is moved off the async workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PamError;
use crate::models::{
    FeedItemRecord, HypothesisEvalRecord, ParsedItem, SignalValueRecord, SourceStatusRecord,
};

use super::{CleanupCounts, Store, StoreStats};

/// Cheap to clone; all clones share one underlying store.
#[derive(Clone)]
pub struct AsyncStore {
    inner: Arc<Store>,
}

impl AsyncStore {
    pub fn new(inner: Arc<Store>) -> Self {
        Self { inner }
    }

    pub fn open(path: &Path) -> Result<Self, PamError> {
        Ok(Self::new(Store::open(path)?))
    }

    /// The underlying synchronous store, for callers that are already on a
    /// blocking thread.
    pub fn sync(&self) -> &Arc<Store> {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> Result<T, PamError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, PamError> + Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| PamError::Internal(format!("store task failed: {e}")))?
    }

    pub async fn store_feed_item(
        &self,
        source_name: String,
        url: String,
        title: String,
        summary: String,
        published: Option<String>,
    ) -> Result<i64, PamError> {
        self.run(move |store| {
            store.store_feed_item(&source_name, &url, &title, &summary, published.as_deref())
        })
        .await
    }

    /// Persist a parsed batch for one source in a single blocking hop.
    /// Individual items remain idempotent on `(source_name, content_hash)`.
    pub async fn store_parsed_items(
        &self,
        source_name: String,
        url: String,
        items: Vec<ParsedItem>,
    ) -> Result<(), PamError> {
        self.run(move |store| {
            for item in &items {
                let published =
                    (!item.published_raw.is_empty()).then_some(item.published_raw.as_str());
                store.store_feed_item(&source_name, &url, &item.title, &item.summary, published)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn store_signal_value(
        &self,
        signal_name: String,
        value: f64,
        country: Option<String>,
        window_days: u32,
    ) -> Result<i64, PamError> {
        self.run(move |store| {
            store.store_signal_value(&signal_name, value, country.as_deref(), window_days)
        })
        .await
    }

    pub async fn store_hypothesis_evaluation(
        &self,
        hypothesis_name: String,
        probability: f64,
        country: Option<String>,
        monte_carlo: Option<(f64, f64, f64)>,
    ) -> Result<i64, PamError> {
        self.run(move |store| {
            store.store_hypothesis_evaluation(
                &hypothesis_name,
                probability,
                country.as_deref(),
                monte_carlo,
            )
        })
        .await
    }

    pub async fn update_source_status(
        &self,
        source_name: String,
        success: bool,
        error: Option<String>,
    ) -> Result<(), PamError> {
        self.run(move |store| store.update_source_status(&source_name, success, error.as_deref()))
            .await
    }

    pub async fn get_feed_items(
        &self,
        source_name: Option<String>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<FeedItemRecord>, PamError> {
        self.run(move |store| store.get_feed_items(source_name.as_deref(), days, limit))
            .await
    }

    pub async fn get_signal_history(
        &self,
        signal_name: String,
        days: u32,
        country: Option<String>,
    ) -> Result<Vec<SignalValueRecord>, PamError> {
        self.run(move |store| store.get_signal_history(&signal_name, days, country.as_deref()))
            .await
    }

    pub async fn get_hypothesis_history(
        &self,
        hypothesis_name: String,
        days: u32,
        country: Option<String>,
    ) -> Result<Vec<HypothesisEvalRecord>, PamError> {
        self.run(move |store| {
            store.get_hypothesis_history(&hypothesis_name, days, country.as_deref())
        })
        .await
    }

    pub async fn get_source_status(&self) -> Result<Vec<SourceStatusRecord>, PamError> {
        self.run(|store| store.get_source_status()).await
    }

    pub async fn cleanup_old_data(&self, days: u32) -> Result<CleanupCounts, PamError> {
        self.run(move |store| store.cleanup_old_data(days)).await
    }

    pub async fn export_to_json(&self, path: PathBuf, days: u32) -> Result<(), PamError> {
        self.run(move |store| store.export_to_json(&path, days))
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats, PamError> {
        self.run(|store| store.stats()).await
    }
}
