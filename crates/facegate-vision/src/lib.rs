//! facegate-vision — Face detection, embedding, and matching.
//!
//! Uses a YOLO face model for detection and ArcFace for embeddings, both
//! running via ONNX Runtime for CPU inference.

pub mod analyzer;
pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod types;

pub use analyzer::{FaceAnalyzer, OnnxFaceAnalyzer, VisionError};
pub use matcher::{
    DescriptorMatcher, MatchOutcome, NearestMatcher, DEFAULT_MATCH_THRESHOLD, UNKNOWN_LABEL,
};
pub use types::{BoundingBox, Embedding, LabeledDescriptors};

use std::path::PathBuf;

/// Default model directory when `FACEGATE_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegate/models")
}
