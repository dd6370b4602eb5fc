use crate::catalog::CatalogError;
use facegate_camera::CameraError;
use facegate_vision::VisionError;
use thiserror::Error;

/// Errors surfaced through the session's event channel.
///
/// A below-threshold match is not an error — it arrives as a
/// `VerificationReport { is_match: false }`.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Camera stream could not be opened; session is denied.
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    /// Detection models failed to load; session is denied.
    #[error("model initialization failed: {0}")]
    ModelInit(#[source] VisionError),
    /// Embedding or detection failed during a capture attempt.
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
    /// Reference-image catalog request failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    /// No reference image for the subject could be embedded.
    #[error("no usable reference images for subject {subject}")]
    NoReferenceImages { subject: String },
    /// The live capture contained no detectable face.
    #[error("no face detected in captured photos")]
    NoFaceDetected,
    /// The session task exited before replying.
    #[error("session task exited")]
    SessionClosed,
}
