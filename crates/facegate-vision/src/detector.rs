//! YOLO-face detector via ONNX Runtime.
//!
//! Runs a single-output YOLO face model (rows of `[cx, cy, w, h, conf]`)
//! with letterbox preprocessing and IoU-based NMS post-processing.

use crate::types::BoundingBox;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YOLO_FALLBACK_INPUT_SIZE: usize = 640;
const YOLO_CONFIDENCE_THRESHOLD: f32 = 0.5;
const YOLO_NMS_THRESHOLD: f32 = 0.45;
/// Minimum per-detection feature count: cx, cy, w, h, confidence.
const YOLO_MIN_FEATURES: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place a YOLO face model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// YOLO-face detector backed by an ONNX Runtime session.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
}

impl FaceDetector {
    /// Load the YOLO face model from the given path.
    ///
    /// The input resolution is read from the model's NCHW input shape,
    /// falling back to 640 when the shape is dynamic.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    // NCHW: [1, 3, H, W]; H == W for square input
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as usize)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(YOLO_FALLBACK_INPUT_SIZE);

        tracing::info!(
            path = model_path,
            input_size,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded YOLO face model"
        );

        Ok(Self {
            session,
            input_size,
        })
    }

    /// Detect faces in a decoded RGB image, sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = self.preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        if outputs.len() == 0 {
            return Err(DetectorError::InferenceFailed(
                "model produced no outputs".into(),
            ));
        }

        let tensor = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection output: {e}")))?;
        let shape = tensor.shape().to_vec();
        let data = tensor
            .as_slice()
            .ok_or_else(|| DetectorError::InferenceFailed("non-contiguous output".into()))?;

        let detections = decode_output(&shape, data, &letterbox, YOLO_CONFIDENCE_THRESHOLD)?;

        let mut result = nms(detections, YOLO_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }

    /// Letterbox-resize into an NCHW float tensor normalized to [0, 1].
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = image.dimensions();
        let size = self.input_size;

        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).max(1);
        let new_h = ((height as f32 * scale).round() as u32).max(1);
        let pad_x = (size as f32 - new_w as f32) / 2.0;
        let pad_y = (size as f32 - new_h as f32) / 2.0;

        let resized =
            image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle);

        let x0 = pad_x.floor() as u32;
        let y0 = pad_y.floor() as u32;

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (px, py, pixel) in resized.enumerate_pixels() {
            let x = (x0 + px) as usize;
            let y = (y0 + py) as usize;
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel.0[c] as f32 / 255.0;
            }
        }

        (
            tensor,
            LetterboxInfo {
                scale,
                pad_x,
                pad_y,
            },
        )
    }
}

/// Decode a YOLO output tensor into bounding boxes in original image space.
///
/// Accepts both `[1, features, detections]` (transposed) and
/// `[1, detections, features]` layouts; the smaller axis is the feature
/// axis.
fn decode_output(
    shape: &[usize],
    data: &[f32],
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Result<Vec<BoundingBox>, DetectorError> {
    if shape.len() != 3 {
        return Err(DetectorError::InferenceFailed(format!(
            "unexpected output shape: {shape:?}"
        )));
    }

    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < YOLO_MIN_FEATURES {
        return Err(DetectorError::InferenceFailed(format!(
            "detection rows carry {num_feats} features, need at least {YOLO_MIN_FEATURES}"
        )));
    }

    let at = |det: usize, feat: usize| -> f32 {
        if transposed {
            data[feat * num_dets + det]
        } else {
            data[det * num_feats + feat]
        }
    };

    let mut detections = Vec::new();
    for i in 0..num_dets {
        let confidence = at(i, 4);
        if confidence <= threshold {
            continue;
        }

        let cx = at(i, 0);
        let cy = at(i, 1);
        let w = at(i, 2);
        let h = at(i, 3);

        // Map from letterboxed space back to original image space
        let x1 = (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale;
        let y1 = (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale;
        let x2 = (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale;
        let y2 = (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale;

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    Ok(detections)
}

/// Non-Maximum Suppression: drop detections overlapping a stronger one.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union of two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
