//! Merges per-axis similarity scores into one ranked list.

use serde::{Deserialize, Serialize};

use crate::search::axis::Axis;

/// Default number of results.
pub const DEFAULT_TOP_K: usize = 10;

/// Similarity of one location on every axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisScores {
    pub aesthetics: f32,
    pub architecture: f32,
    pub color: f32,
    pub mood: f32,
}

impl AxisScores {
    pub fn get(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Aesthetics => self.aesthetics,
            Axis::Architecture => self.architecture,
            Axis::Color => self.color,
            Axis::Mood => self.mood,
        }
    }

    /// Weighted sum over all axes.
    pub fn combined(&self) -> f32 {
        Axis::ALL.iter().map(|a| a.weight() * self.get(*a)).sum()
    }
}

/// A location with its scores, before metadata is joined back.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub index: usize,
    pub axis_scores: AxisScores,
    pub combined_score: f32,
}

/// Per-axis score arrays, indexed by [`Axis::ordinal`].
pub type AxisScoreTable = [Vec<f32>; 4];

/// Combine, sort and truncate.
///
/// All arrays in `scores` must have the same length. Results are sorted by
/// descending combined score with ties broken by ascending index, truncated
/// to `top_k`, then filtered by `min_score` when given.
pub fn rank(scores: &AxisScoreTable, top_k: usize, min_score: Option<f32>) -> Vec<ScoredResult> {
    let count = scores[0].len();
    debug_assert!(scores.iter().all(|s| s.len() == count));

    let mut results: Vec<ScoredResult> = (0..count)
        .map(|index| {
            let axis_scores = AxisScores {
                aesthetics: scores[Axis::Aesthetics.ordinal()][index],
                architecture: scores[Axis::Architecture.ordinal()][index],
                color: scores[Axis::Color.ordinal()][index],
                mood: scores[Axis::Mood.ordinal()][index],
            };
            ScoredResult {
                index,
                combined_score: axis_scores.combined(),
                axis_scores,
            }
        })
        .collect();

    let by_rank = |a: &ScoredResult, b: &ScoredResult| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then(a.index.cmp(&b.index))
    };

    if top_k < results.len() {
        // move the best `top_k` to the front before sorting just those
        results.select_nth_unstable_by(top_k, by_rank);
        results.truncate(top_k);
    }
    results.sort_by(by_rank);

    if let Some(min) = min_score {
        results.retain(|r| r.combined_score >= min);
    }

    results
}
