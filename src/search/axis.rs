//! Semantic axes a location is described on.
//!
//! Every location carries one embedding per axis. Axis weights are fixed and
//! sum to 1.0, so the combined score stays within the cosine range.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Aesthetics,
    Architecture,
    Color,
    Mood,
}

impl Axis {
    /// All axes in scoring order.
    pub const ALL: [Axis; 4] = [
        Axis::Aesthetics,
        Axis::Architecture,
        Axis::Color,
        Axis::Mood,
    ];

    /// Weight of this axis in the combined score.
    pub const fn weight(self) -> f32 {
        match self {
            Axis::Aesthetics => 0.3,
            Axis::Architecture => 0.3,
            Axis::Color => 0.2,
            Axis::Mood => 0.2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Axis::Aesthetics => "aesthetics",
            Axis::Architecture => "architecture",
            Axis::Color => "color",
            Axis::Mood => "mood",
        }
    }

    /// File name the vector table for this axis is published under.
    pub const fn default_file_name(self) -> &'static str {
        match self {
            Axis::Aesthetics => "aesthetics_vectors.npy",
            Axis::Architecture => "architecture_vectors.npy",
            Axis::Color => "colors_vectors.npy",
            Axis::Mood => "mood_vibes_vectors.npy",
        }
    }

    /// Position of this axis in [`Axis::ALL`].
    pub const fn ordinal(self) -> usize {
        match self {
            Axis::Aesthetics => 0,
            Axis::Architecture => 1,
            Axis::Color => 2,
            Axis::Mood => 3,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
