
/// Shared fixtures for service, web and end-to-end tests.
pub(crate) mod fixtures {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::search::metadata::DescriptiveText;
    use crate::search::source::SourceError;
    use crate::search::store::AxisTable;
    use crate::search::{
        npy, Axis, Coordinates, EmbeddingError, EmbeddingProvider, FeatureSource, FeatureStore,
        FeatureStoreCache, LocalSource, LocationRecord, SearchService, StoreLayout,
    };

    /// Returns the same vector for every query and counts calls.
    pub struct StaticProvider {
        vector: Vec<f32>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        pub fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StaticProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.vector.clone())
        }

        fn name(&self) -> String {
            "static".to_string()
        }
    }

    pub struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Request("connection refused".to_string()))
        }

        fn name(&self) -> String {
            "failing".to_string()
        }
    }

    /// Local directory source that waits before every read.
    pub struct SlowSource {
        inner: LocalSource,
        delay: Duration,
    }

    #[async_trait]
    impl FeatureSource for SlowSource {
        async fn read(&self, name: &str) -> Result<Vec<u8>, SourceError> {
            tokio::time::sleep(self.delay).await;
            self.inner.read(name).await
        }

        fn describe(&self) -> String {
            format!("slow {}", self.inner.describe())
        }
    }

    /// Three 2-d locations: `[1,0]`, `[1,1]`, `[0,1]` on every axis.
    pub fn fixture_store() -> FeatureStore {
        let rows = vec![vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0]];
        let tables = Axis::ALL
            .iter()
            .map(|axis| AxisTable::from_rows(*axis, rows.clone()).unwrap())
            .collect();

        let records = vec![
            LocationRecord {
                index: 0,
                coordinates: Coordinates::new(40.7128, -74.006),
                image_url: "https://img.example.com/0.jpg".into(),
                public_url: "https://cdn.example.com/0.jpg".into(),
                name: "Pier 17".into(),
                text: DescriptiveText {
                    description: "Weathered pier at dusk".into(),
                    ..Default::default()
                },
            },
            LocationRecord {
                index: 1,
                name: "Back alley".into(),
                ..Default::default()
            },
            LocationRecord {
                index: 2,
                ..Default::default()
            },
        ];

        FeatureStore::from_parts(tables, records).unwrap()
    }

    pub fn preloaded_service(provider: impl EmbeddingProvider + 'static) -> Arc<SearchService> {
        preloaded_service_with(Arc::new(provider))
    }

    pub fn preloaded_service_with(provider: Arc<dyn EmbeddingProvider>) -> Arc<SearchService> {
        let source = Arc::new(LocalSource::new(std::env::temp_dir()));
        let cache = FeatureStoreCache::preloaded(fixture_store(), source);
        Arc::new(SearchService::new(cache, StoreLayout::default(), provider))
    }

    /// A service that loads from `dir` on first search.
    pub fn lazy_service(dir: &Path, provider: impl EmbeddingProvider + 'static) -> Arc<SearchService> {
        lazy_service_with(dir, Arc::new(provider))
    }

    pub fn lazy_service_with(dir: &Path, provider: Arc<dyn EmbeddingProvider>) -> Arc<SearchService> {
        let layout = StoreLayout::default();
        let cache = FeatureStoreCache::new(Arc::new(LocalSource::new(dir)), layout.clone());
        Arc::new(SearchService::new(cache, layout, provider))
    }

    /// A lazy service whose reads from `dir` each take `delay`.
    pub fn slow_service(
        dir: &Path,
        delay: Duration,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Arc<SearchService> {
        let layout = StoreLayout::default();
        let source = SlowSource {
            inner: LocalSource::new(dir),
            delay,
        };
        let cache = FeatureStoreCache::new(Arc::new(source), layout.clone());
        Arc::new(SearchService::new(cache, layout, provider))
    }

    /// Write a dataset of `rows` locations with `dim`-dimensional vectors.
    ///
    /// Row `i` points mostly along dimension `i % dim` with a small offset
    /// per axis, so a one-hot query prefers the matching rows.
    pub fn write_dataset(dir: &Path, rows: usize, dim: usize) {
        let layout = StoreLayout::default();
        for axis in Axis::ALL {
            let mut data = Vec::with_capacity(rows * dim);
            for i in 0..rows {
                for d in 0..dim {
                    let base = if d == i % dim { 1.0 } else { 0.0 };
                    data.push(base + 0.01 * (axis.ordinal() + 1) as f32 * (i as f32 / rows as f32));
                }
            }
            std::fs::write(dir.join(layout.file_for(axis)), npy::write_f32(rows, dim, &data))
                .unwrap();
        }

        let mut csv = String::from("image_url,name,description,latitude,longitude\n");
        for i in 0..rows {
            if i % 2 == 0 {
                csv.push_str(&format!(
                    "https://img.example.com/{i}.jpg,Location {i},Spot number {i},{},{}\n",
                    10.0 + i as f64 * 0.01,
                    20.0 + i as f64 * 0.01
                ));
            } else {
                csv.push_str(&format!("https://img.example.com/{i}.jpg,,,,\n"));
            }
        }
        std::fs::write(dir.join(&layout.metadata_file), csv).unwrap();
    }
}
