use serde::{Deserialize, Serialize};

/// Bounding box for a detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    ///
    /// Both vectors are L2-normalized at extraction time, so the distance
    /// lies in [0, 2].
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One-or-more embeddings known to belong to a single person.
///
/// Built once per verification attempt from that subject's reference
/// images and discarded when the attempt completes.
#[derive(Debug, Clone)]
pub struct LabeledDescriptors {
    /// Person identifier (employee id).
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

impl LabeledDescriptors {
    pub fn new(label: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            label: label.into(),
            embeddings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = embedding(vec![1.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_unit_axes() {
        let a = embedding(vec![1.0, 0.0]);
        let b = embedding(vec![0.0, 1.0]);
        assert!((a.euclidean_distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = embedding(vec![1.0, 0.0]);
        let b = embedding(vec![0.8, 0.0]);
        assert!((a.euclidean_distance(&b) - 0.2).abs() < 1e-6);
    }
}
