//! Embedding-based location search.
//!
//! Each scouted location is described on four axes (aesthetics,
//! architecture, color, mood), one precomputed vector per axis. A query is
//! embedded once, compared against every axis, and the weighted combination
//! ranks the locations.
//!
//! # Architecture
//!
//! - `axis`: The four axes, their weights and default file names
//! - `npy`: NumPy `.npy` float matrices via `ndarray-npy`
//! - `metadata`: CSV metadata parsing and coordinate resolution
//! - `source`: Where feature files come from (local directory or HTTP)
//! - `store`: Validated, row-aligned in-memory feature store
//! - `cache`: Process-wide lazy loading with single-flight semantics
//! - `embeddings`: Query embedding providers
//! - `similarity`: Bulk cosine similarity against an axis table
//! - `ranker`: Weighted combination, ordering and truncation
//! - `preprocess`: Query normalization
//! - `service`: The search orchestrator

pub mod axis;
pub mod cache;
pub mod embeddings;
pub mod metadata;
pub mod npy;
mod preprocess;
pub mod ranker;
pub mod similarity;
pub mod source;
mod service;
pub mod store;

pub use axis::Axis;
pub use cache::{CacheStatus, FeatureStoreCache};
pub use embeddings::{EmbeddingError, EmbeddingProvider, HttpEmbeddingProvider};
#[cfg(feature = "fastembed")]
pub use embeddings::FastEmbedProvider;
pub use metadata::{Coordinates, LocationRecord};
pub use ranker::DEFAULT_TOP_K;
pub use service::{
    AxisInfo, CancelSignal, RankedResult, SearchError, SearchOptions, SearchService,
};
pub use source::{FeatureSource, HttpSource, LocalSource};
pub use store::{FeatureStore, LoadError, StoreLayout};

/// Default local embedding model.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
