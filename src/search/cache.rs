//! Process-wide lazy feature store.
//!
//! The store is loaded at most once per successful load. While a load is in
//! flight every caller awaits the same shared future; once it succeeds the
//! store is published into a `OnceCell` and later reads take no lock. A
//! failed load is remembered for status reporting only: the next caller
//! starts a fresh attempt. A load nobody awaits any more is dropped and the
//! cache returns to idle.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::search::source::FeatureSource;
use crate::search::store::{FeatureStore, LoadError, StoreLayout};

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<FeatureStore>, LoadError>>>;

enum LoadState {
    Idle,
    /// `waiters` counts callers currently awaiting `load`.
    Loading { load: SharedLoad, waiters: usize },
    Loaded,
    Failed(LoadError),
}

/// Snapshot of the cache state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CacheStatus {
    Idle,
    Loading,
    Loaded {
        locations: usize,
        dimension: usize,
        mappable: usize,
    },
    Failed {
        error: String,
    },
}

pub struct FeatureStoreCache {
    source: Arc<dyn FeatureSource>,
    layout: StoreLayout,
    loaded: OnceCell<Arc<FeatureStore>>,
    state: Mutex<LoadState>,
}

impl FeatureStoreCache {
    pub fn new(source: Arc<dyn FeatureSource>, layout: StoreLayout) -> Self {
        Self {
            source,
            layout,
            loaded: OnceCell::new(),
            state: Mutex::new(LoadState::Idle),
        }
    }

    /// Build a cache around an already loaded store.
    pub fn preloaded(store: FeatureStore, source: Arc<dyn FeatureSource>) -> Self {
        let cache = Self::new(source, StoreLayout::default());
        let _ = cache.loaded.set(Arc::new(store));
        if let Ok(mut state) = cache.state.lock() {
            *state = LoadState::Loaded;
        }
        cache
    }

    /// The store, if a load has completed.
    #[cfg(test)]
    pub fn get(&self) -> Option<Arc<FeatureStore>> {
        self.loaded.get().cloned()
    }

    /// Return the store, loading it if needed.
    ///
    /// Concurrent callers during a load share that load and its outcome.
    pub async fn get_or_load(&self) -> Result<Arc<FeatureStore>, LoadError> {
        if let Some(store) = self.loaded.get() {
            return Ok(store.clone());
        }

        let load = {
            let mut state = self.lock_state()?;
            // re-check under the lock: a load may have finished meanwhile
            if let Some(store) = self.loaded.get() {
                return Ok(store.clone());
            }
            match &mut *state {
                LoadState::Loading { load, waiters } => {
                    *waiters += 1;
                    load.clone()
                }
                _ => {
                    let load = self.start_load();
                    *state = LoadState::Loading {
                        load: load.clone(),
                        waiters: 1,
                    };
                    load
                }
            }
        };

        // deregisters this caller even if it is dropped mid-load
        let _waiter = LoadWaiter {
            state: &self.state,
            load: load.clone(),
        };

        let result = load.clone().await;

        {
            let mut state = self.lock_state()?;
            match &result {
                Ok(store) => {
                    let _ = self.loaded.set(store.clone());
                    *state = LoadState::Loaded;
                }
                Err(e) => {
                    // only the first waiter of this attempt records the failure;
                    // a newer attempt may already be running
                    if matches!(&*state, LoadState::Loading { load: current, .. } if current.ptr_eq(&load))
                    {
                        log::error!("feature store load failed: {}", e);
                        *state = LoadState::Failed(e.clone());
                    }
                }
            }
        }

        result
    }

    pub fn status(&self) -> CacheStatus {
        if let Some(store) = self.loaded.get() {
            return CacheStatus::Loaded {
                locations: store.len(),
                dimension: store.dimension(),
                mappable: store.mappable_count(),
            };
        }

        match self.state.lock() {
            Ok(state) => match &*state {
                LoadState::Idle | LoadState::Loaded => CacheStatus::Idle,
                LoadState::Loading { .. } => CacheStatus::Loading,
                LoadState::Failed(e) => CacheStatus::Failed {
                    error: e.to_string(),
                },
            },
            Err(e) => CacheStatus::Failed {
                error: format!("Lock poisoned: {}", e),
            },
        }
    }

    fn start_load(&self) -> SharedLoad {
        let source = self.source.clone();
        let layout = self.layout.clone();
        async move {
            FeatureStore::load(source.as_ref(), &layout)
                .await
                .map(Arc::new)
        }
        .boxed()
        .shared()
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, LoadState>, LoadError> {
        self.state
            .lock()
            .map_err(|e| LoadError::Internal(format!("Lock poisoned: {}", e)))
    }
}

/// A caller registered on an in-flight load.
///
/// When the last caller is dropped before the load finishes nothing polls
/// the shared future any more, so the state goes back to idle and the next
/// caller starts a new load.
struct LoadWaiter<'a> {
    state: &'a Mutex<LoadState>,
    load: SharedLoad,
}

impl Drop for LoadWaiter<'_> {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let abandoned = match &mut *state {
            LoadState::Loading { load, waiters } if load.ptr_eq(&self.load) => {
                *waiters -= 1;
                *waiters == 0
            }
            _ => false,
        };
        if abandoned {
            log::debug!("feature store load abandoned by its last caller");
            *state = LoadState::Idle;
        }
    }
}
