//! Adapter over the detector + embedder pair.
//!
//! All callers hand in encoded image bytes — PNG snapshots from the
//! camera and fetched reference images go through the same decode path.
//! The live-capture policy treats anything other than exactly one face
//! as "no face"; the reference-loading policy takes the best face.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::Embedding;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "yolov8n-face.onnx";
const EMBEDDER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// Face detection and embedding over encoded image bytes.
///
/// Implementations are shared across verification sessions; the session
/// layer tests against a mock.
pub trait FaceAnalyzer: Send + Sync {
    /// Load models if not already loaded. Redundant calls no-op.
    fn ensure_ready(&self) -> Result<(), VisionError>;

    /// Number of faces detected in the image.
    fn face_count(&self, image_bytes: &[u8]) -> Result<usize, VisionError>;

    /// Embedding for the face in the image, or `None` unless exactly one
    /// face is present.
    fn embed_sole_face(&self, image_bytes: &[u8]) -> Result<Option<Embedding>, VisionError>;

    /// Embedding for the highest-confidence face, or `None` if no face
    /// is detected.
    fn embed_primary_face(&self, image_bytes: &[u8]) -> Result<Option<Embedding>, VisionError>;
}

struct Models {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

/// ONNX-backed analyzer. One instance per process; models load lazily on
/// first use and every call after that reuses them. The interior mutex
/// also serializes inference, so concurrent presence polls never overlap.
pub struct OnnxFaceAnalyzer {
    model_dir: PathBuf,
    models: Mutex<Option<Models>>,
}

impl OnnxFaceAnalyzer {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            models: Mutex::new(None),
        }
    }

    fn with_models<T>(
        &self,
        f: impl FnOnce(&mut Models) -> Result<T, VisionError>,
    ) -> Result<T, VisionError> {
        let mut guard = self.models.lock().expect("analyzer mutex poisoned");
        if guard.is_none() {
            let detector_path = self.model_dir.join(DETECTOR_MODEL_FILE);
            let embedder_path = self.model_dir.join(EMBEDDER_MODEL_FILE);
            let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
            let embedder = FaceEmbedder::load(&embedder_path.to_string_lossy())?;
            *guard = Some(Models { detector, embedder });
        }
        f(guard.as_mut().expect("models just loaded"))
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn ensure_ready(&self) -> Result<(), VisionError> {
        self.with_models(|_| Ok(()))
    }

    fn face_count(&self, image_bytes: &[u8]) -> Result<usize, VisionError> {
        let rgb = image::load_from_memory(image_bytes)?.to_rgb8();
        self.with_models(|models| Ok(models.detector.detect(&rgb)?.len()))
    }

    fn embed_sole_face(&self, image_bytes: &[u8]) -> Result<Option<Embedding>, VisionError> {
        let rgb = image::load_from_memory(image_bytes)?.to_rgb8();
        self.with_models(|models| {
            let faces = models.detector.detect(&rgb)?;
            let [face] = faces.as_slice() else {
                tracing::debug!(count = faces.len(), "not exactly one face");
                return Ok(None);
            };
            Ok(Some(models.embedder.extract(&rgb, face)?))
        })
    }

    fn embed_primary_face(&self, image_bytes: &[u8]) -> Result<Option<Embedding>, VisionError> {
        let rgb = image::load_from_memory(image_bytes)?.to_rgb8();
        self.with_models(|models| {
            let faces = models.detector.detect(&rgb)?;
            let Some(face) = faces.first() else {
                return Ok(None);
            };
            Ok(Some(models.embedder.extract(&rgb, face)?))
        })
    }
}
