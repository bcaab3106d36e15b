//! Bulk cosine similarity.
//!
//! Scores a query against every row of an axis table in one pass over the
//! contiguous matrix. Row norms come precomputed from the table, so each row
//! costs a single dot product.

use rayon::prelude::*;

use crate::search::store::AxisTable;

/// Below this many rows the scan stays on the calling thread.
const PARALLEL_MIN_ROWS: usize = 4096;

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine from a dot product and both norms. Zero norm scores 0.
fn cosine_from_parts(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a * norm_b);
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(-1.0, 1.0)
}

/// Cosine similarity of two vectors of equal length.
#[cfg(test)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    cosine_from_parts(dot(a, b), l2_norm(a), l2_norm(b))
}

/// Cosine similarity between `query` and every row of `table`.
///
/// `query.len()` must equal `table.dimension()`; the caller checks this once
/// per search. The output has one score per row, in row order.
pub fn axis_similarities(query: &[f32], table: &AxisTable) -> Vec<f32> {
    debug_assert_eq!(query.len(), table.dimension());

    let rows = table.rows();
    let dimension = table.dimension();
    if rows == 0 || dimension == 0 {
        return vec![0.0; rows];
    }

    let query_norm = l2_norm(query);
    if query_norm == 0.0 {
        return vec![0.0; rows];
    }

    let score = |(row, &row_norm): (&[f32], &f32)| cosine_from_parts(dot(query, row), query_norm, row_norm);

    if rows >= PARALLEL_MIN_ROWS {
        table
            .data()
            .par_chunks_exact(dimension)
            .zip(table.norms().par_iter())
            .map(score)
            .collect()
    } else {
        table
            .data()
            .chunks_exact(dimension)
            .zip(table.norms().iter())
            .map(score)
            .collect()
    }
}
