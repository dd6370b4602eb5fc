//! Nearest-neighbor descriptor matching.
//!
//! A probe embedding matches a labeled descriptor set when its nearest
//! reference embedding lies below the distance threshold; otherwise the
//! outcome carries the `"unknown"` sentinel label.

use crate::types::{Embedding, LabeledDescriptors};

/// Sentinel label for a probe whose nearest reference is beyond threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Default maximum embedding distance still considered a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Outcome of matching one probe embedding against reference descriptors.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Label of the nearest descriptor set, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Euclidean distance to the nearest reference embedding.
    pub distance: f32,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }

    /// Similarity percentage: `(1 - distance) * 100`, clamped at 0.
    ///
    /// Distance can exceed 1.0 for dissimilar faces; a negative
    /// percentage is meaningless to callers, so the floor is 0.
    pub fn similarity(&self) -> f32 {
        ((1.0 - self.distance) * 100.0).max(0.0)
    }
}

/// Strategy for comparing a probe embedding against labeled references.
pub trait DescriptorMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        references: &[LabeledDescriptors],
        threshold: f32,
    ) -> MatchOutcome;
}

/// Euclidean nearest-neighbor matcher.
///
/// Scans every reference embedding of every set and keeps the nearest.
pub struct NearestMatcher;

impl DescriptorMatcher for NearestMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        references: &[LabeledDescriptors],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best_distance = f32::INFINITY;
        let mut best_label: Option<&str> = None;

        for set in references {
            for reference in &set.embeddings {
                let distance = probe.euclidean_distance(reference);
                if distance < best_distance {
                    best_distance = distance;
                    best_label = Some(&set.label);
                }
            }
        }

        match best_label {
            Some(label) if best_distance < threshold => MatchOutcome {
                label: label.to_string(),
                distance: best_distance,
            },
            _ => MatchOutcome {
                label: UNKNOWN_LABEL.to_string(),
                distance: if best_distance.is_finite() {
                    best_distance
                } else {
                    1.0
                },
            },
        }
    }
}
