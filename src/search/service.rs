//! Location search service.
//!
//! Provides the single search entry point:
//! - Lazy-loads the feature store through the shared cache
//! - Embeds the query with the configured provider
//! - Scores every axis, ranks, and joins metadata back onto the winners

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::search::axis::Axis;
use crate::search::cache::{CacheStatus, FeatureStoreCache};
use crate::search::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::search::metadata::{Coordinates, LocationRecord};
use crate::search::preprocess::normalize_query;
use crate::search::ranker::{self, AxisScoreTable, AxisScores, ScoredResult, DEFAULT_TOP_K};
use crate::search::similarity::axis_similarities;
use crate::search::store::{FeatureStore, LoadError, StoreLayout};

/// Errors that can occur during a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Query must not be empty")]
    InvalidQuery,

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Location data unavailable: {0}")]
    Load(#[from] LoadError),

    #[error("Embedding provider failed: {0}")]
    EmbeddingProvider(#[from] EmbeddingError),

    #[error("Embedding has dimension {got}, location data expects {expected}")]
    EmbeddingDimension { expected: usize, got: usize },

    #[error("Search cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Cooperative cancellation flag shared between a caller and a search.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Per-call search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results; must be at least 1.
    pub top_k: usize,
    /// Drop results whose combined score is below this value.
    pub min_score: Option<f32>,
    pub cancel: Option<CancelSignal>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: None,
            cancel: None,
        }
    }
}

/// One ranked location, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub index: usize,
    pub combined_score: f32,
    pub axis_scores: AxisScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Map link derived from the coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maps_url: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptive_text: Option<String>,
}

impl RankedResult {
    fn from_parts(record: &LocationRecord, scored: ScoredResult) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Self {
            index: scored.index,
            combined_score: scored.combined_score,
            axis_scores: scored.axis_scores,
            coordinates: record.coordinates,
            image_url: non_empty(&record.image_url),
            public_url: non_empty(&record.public_url),
            maps_url: record.coordinates.map(|c| c.maps_url()),
            name: record.display_name().to_string(),
            descriptive_text: record.text.display().map(str::to_string),
        }
    }
}

/// Axis description for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisInfo {
    pub name: Axis,
    pub weight: f32,
    pub file: String,
}

/// Service for searching scouted locations.
///
/// Cheap to share behind an `Arc`; all state after the first load is
/// read-only.
pub struct SearchService {
    cache: FeatureStoreCache,
    provider: Arc<dyn EmbeddingProvider>,
    layout: StoreLayout,
    defaults: SearchOptions,
}

impl SearchService {
    pub fn new(
        cache: FeatureStoreCache,
        layout: StoreLayout,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            cache,
            provider,
            layout,
            defaults: SearchOptions::default(),
        }
    }

    /// Replace the options used by [`SearchService::default_options`].
    pub fn with_defaults(mut self, defaults: SearchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn default_options(&self) -> SearchOptions {
        self.defaults.clone()
    }

    /// Search for locations matching `query`.
    ///
    /// Results are sorted by combined score (highest first), ties by index.
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<RankedResult>, SearchError> {
        let query = normalize_query(query).ok_or(SearchError::InvalidQuery)?;
        if options.top_k == 0 {
            return Err(SearchError::InvalidTopK);
        }

        let started = Instant::now();
        let cancel = options.cancel.as_ref();
        ensure_not_cancelled(cancel)?;

        let store = until_cancelled(cancel, self.cache.get_or_load()).await??;

        let query_vector = until_cancelled(cancel, self.provider.embed(&query)).await??;
        if !store.is_empty() && query_vector.len() != store.dimension() {
            return Err(SearchError::EmbeddingDimension {
                expected: store.dimension(),
                got: query_vector.len(),
            });
        }

        let scoring_store = store.clone();
        let scoring_cancel = options.cancel.clone();
        let scores = tokio::task::spawn_blocking(move || {
            score_axes(&scoring_store, &query_vector, scoring_cancel.as_ref())
        })
        .await
        .map_err(|e| SearchError::Internal(format!("scoring task failed: {e}")))??;
        ensure_not_cancelled(cancel)?;

        let ranked = ranker::rank(&scores, options.top_k, options.min_score);
        let results: Vec<RankedResult> = ranked
            .into_iter()
            .filter_map(|scored| {
                store
                    .record(scored.index)
                    .map(|record| RankedResult::from_parts(record, scored))
            })
            .collect();

        log::debug!(
            "search {:?}: {} results from {} locations in {:?}",
            query,
            results.len(),
            store.len(),
            started.elapsed()
        );

        Ok(results)
    }

    /// Load the feature store now instead of on first search.
    pub async fn warm_up(&self) -> Result<Arc<FeatureStore>, SearchError> {
        Ok(self.cache.get_or_load().await?)
    }

    pub fn axes(&self) -> Vec<AxisInfo> {
        Axis::ALL
            .iter()
            .map(|axis| AxisInfo {
                name: *axis,
                weight: axis.weight(),
                file: self.layout.file_for(*axis).to_string(),
            })
            .collect()
    }

    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }

    pub fn provider_name(&self) -> String {
        self.provider.name()
    }
}

fn ensure_not_cancelled(cancel: Option<&CancelSignal>) -> Result<(), SearchError> {
    match cancel {
        Some(c) if c.is_cancelled() => Err(SearchError::Cancelled),
        _ => Ok(()),
    }
}

/// Await `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(
    cancel: Option<&CancelSignal>,
    fut: F,
) -> Result<F::Output, SearchError> {
    match cancel {
        None => Ok(fut.await),
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SearchError::Cancelled),
                out = fut => Ok(out),
            }
        }
    }
}

/// Similarity of `query` against every axis, stopping between axes on cancel.
fn score_axes(
    store: &FeatureStore,
    query: &[f32],
    cancel: Option<&CancelSignal>,
) -> Result<AxisScoreTable, SearchError> {
    let mut scores: AxisScoreTable = Default::default();
    for axis in Axis::ALL {
        ensure_not_cancelled(cancel)?;
        scores[axis.ordinal()] = if store.is_empty() {
            Vec::new()
        } else {
            axis_similarities(query, store.table(axis))
        };
    }
    Ok(scores)
}
