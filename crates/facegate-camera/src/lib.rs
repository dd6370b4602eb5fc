//! facegate-camera — Camera acquisition and frame sampling.
//!
//! V4L2-based capture behind the [`CameraSource`]/[`VideoSource`] seam;
//! samples are PNG-encoded stills ready for the vision decode path.

pub mod camera;
pub mod frame;

pub use camera::{
    CameraError, CameraSource, CaptureConstraints, CapturedPhoto, DeviceInfo, V4lCamera,
    V4lCameraSource, VideoSource,
};
