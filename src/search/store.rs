//! In-memory feature store.
//!
//! Holds one dense vector table per [`Axis`] plus the location metadata, all
//! row aligned. A store is validated once when it is built and never mutated
//! afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::search::axis::Axis;
use crate::search::metadata::{self, LocationRecord};
use crate::search::npy;
use crate::search::similarity;
use crate::search::source::{FeatureSource, SourceError};

/// Default name of the metadata file.
pub const DEFAULT_METADATA_FILE: &str = "metadata_with_coordinates.csv";

/// Errors that can occur while loading the feature store.
///
/// Cloneable so one failed in-flight load can be reported to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("required file missing: {0}")]
    Missing(String),

    #[error("source error: {0}")]
    Source(SourceError),

    #[error("failed to parse {file}: {message}")]
    Parse { file: String, message: String },

    #[error("row count mismatch: {file} has {got} rows, expected {expected}")]
    RowCountMismatch {
        file: String,
        expected: usize,
        got: usize,
    },

    #[error("dimension mismatch: {file} has dimension {got}, expected {expected}")]
    DimensionMismatch {
        file: String,
        expected: usize,
        got: usize,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SourceError> for LoadError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(name) => LoadError::Missing(name),
            other => LoadError::Source(other),
        }
    }
}

/// File names making up one feature store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreLayout {
    pub axis_files: BTreeMap<Axis, String>,
    pub metadata_file: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            axis_files: Axis::ALL
                .iter()
                .map(|axis| (*axis, axis.default_file_name().to_string()))
                .collect(),
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
        }
    }
}

impl StoreLayout {
    /// File name for `axis`, falling back to the default name.
    pub fn file_for(&self, axis: Axis) -> &str {
        self.axis_files
            .get(&axis)
            .map(String::as_str)
            .unwrap_or_else(|| axis.default_file_name())
    }
}

/// Dense row-major vector table for one axis.
#[derive(Debug, Clone)]
pub struct AxisTable {
    axis: Axis,
    rows: usize,
    dimension: usize,
    data: Vec<f32>,
    /// L2 norm of every row, computed once at load.
    norms: Vec<f32>,
}

impl AxisTable {
    pub fn new(axis: Axis, rows: usize, dimension: usize, data: Vec<f32>) -> Result<Self, LoadError> {
        if data.len() != rows * dimension {
            return Err(LoadError::Parse {
                file: axis.to_string(),
                message: format!(
                    "expected {} values for {}x{} table, got {}",
                    rows * dimension,
                    rows,
                    dimension,
                    data.len()
                ),
            });
        }
        if rows > 0 && dimension == 0 {
            return Err(LoadError::Parse {
                file: axis.to_string(),
                message: "vectors have zero dimension".to_string(),
            });
        }

        let norms = if dimension == 0 {
            Vec::new()
        } else {
            data.chunks_exact(dimension)
                .map(similarity::l2_norm)
                .collect()
        };

        Ok(Self {
            axis,
            rows,
            dimension,
            data,
            norms,
        })
    }

    /// Build a table from individual rows. All rows must share one length.
    pub fn from_rows(axis: Axis, rows: Vec<Vec<f32>>) -> Result<Self, LoadError> {
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|r| r.len() != dimension) {
            return Err(LoadError::Parse {
                file: axis.to_string(),
                message: format!("row {} has {} values, expected {}", bad, rows[bad].len(), dimension),
            });
        }
        let count = rows.len();
        Self::new(axis, count, dimension, rows.into_iter().flatten().collect())
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Contiguous row-major values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn norms(&self) -> &[f32] {
        &self.norms
    }

    #[cfg(test)]
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }
}

/// Validated, immutable set of axis tables and metadata.
#[derive(Debug)]
pub struct FeatureStore {
    /// Indexed by [`Axis::ordinal`].
    tables: Vec<AxisTable>,
    records: Vec<LocationRecord>,
    dimension: usize,
    malformed_rows: usize,
}

impl FeatureStore {
    /// Assemble a store, enforcing row and dimension agreement.
    pub fn from_parts(
        tables: Vec<AxisTable>,
        records: Vec<LocationRecord>,
    ) -> Result<Self, LoadError> {
        Self::assemble(tables, records, &StoreLayout::default(), 0)
    }

    fn assemble(
        mut tables: Vec<AxisTable>,
        records: Vec<LocationRecord>,
        layout: &StoreLayout,
        malformed_rows: usize,
    ) -> Result<Self, LoadError> {
        tables.sort_by_key(|t| t.axis().ordinal());
        for axis in Axis::ALL {
            let count = tables.iter().filter(|t| t.axis() == axis).count();
            if count != 1 {
                return Err(LoadError::Internal(format!(
                    "expected exactly one {axis} table, got {count}"
                )));
            }
        }

        let expected_rows = records.len();
        for table in &tables {
            if table.rows() != expected_rows {
                return Err(LoadError::RowCountMismatch {
                    file: layout.file_for(table.axis()).to_string(),
                    expected: expected_rows,
                    got: table.rows(),
                });
            }
        }

        let dimension = tables[0].dimension();
        if expected_rows > 0 {
            for table in &tables[1..] {
                if table.dimension() != dimension {
                    return Err(LoadError::DimensionMismatch {
                        file: layout.file_for(table.axis()).to_string(),
                        expected: dimension,
                        got: table.dimension(),
                    });
                }
            }
        }

        Ok(Self {
            tables,
            records,
            dimension,
            malformed_rows,
        })
    }

    /// Read every file named by `layout` from `source` and build a store.
    ///
    /// Files are fetched concurrently; parsing runs on the blocking pool.
    pub async fn load(source: &dyn FeatureSource, layout: &StoreLayout) -> Result<Self, LoadError> {
        log::info!("loading feature store from {}", source.describe());

        let metadata_read = source.read(&layout.metadata_file);
        let axis_reads = futures::future::try_join_all(Axis::ALL.iter().map(|axis| async move {
            let bytes = source.read(layout.file_for(*axis)).await?;
            Ok::<_, SourceError>((*axis, bytes))
        }));

        let (metadata_bytes, axis_bytes) = futures::try_join!(metadata_read, axis_reads)?;

        let layout = layout.clone();
        let store = tokio::task::spawn_blocking(move || {
            Self::parse(&layout, metadata_bytes, axis_bytes)
        })
        .await
        .map_err(|e| LoadError::Internal(format!("loader task failed: {e}")))??;

        log::info!(
            "feature store ready: {} locations, dimension {}, {} mappable",
            store.len(),
            store.dimension(),
            store.mappable_count()
        );
        if store.malformed_rows > 0 {
            log::warn!(
                "{} metadata rows were malformed and loaded with empty fields",
                store.malformed_rows
            );
        }

        Ok(store)
    }

    fn parse(
        layout: &StoreLayout,
        metadata_bytes: Vec<u8>,
        axis_bytes: Vec<(Axis, Vec<u8>)>,
    ) -> Result<Self, LoadError> {
        let text = String::from_utf8_lossy(&metadata_bytes);
        let parsed = metadata::parse_metadata(&text).map_err(|e| LoadError::Parse {
            file: layout.metadata_file.clone(),
            message: e.to_string(),
        })?;

        let mut tables = Vec::with_capacity(axis_bytes.len());
        for (axis, bytes) in axis_bytes {
            let file = layout.file_for(axis);
            let matrix = npy::read_f32(&bytes).map_err(|e| LoadError::Parse {
                file: file.to_string(),
                message: e.to_string(),
            })?;
            log::debug!("{file}: {} vectors of dimension {}", matrix.rows, matrix.cols);
            tables.push(AxisTable::new(axis, matrix.rows, matrix.cols, matrix.data)?);
        }

        let malformed = parsed.malformed_rows.len();
        Self::assemble(tables, parsed.records, layout, malformed)
    }

    pub fn table(&self, axis: Axis) -> &AxisTable {
        &self.tables[axis.ordinal()]
    }

    pub fn record(&self, index: usize) -> Option<&LocationRecord> {
        self.records.get(index)
    }

    /// Number of locations.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn mappable_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_mappable()).count()
    }

    pub fn malformed_rows(&self) -> usize {
        self.malformed_rows
    }
}
