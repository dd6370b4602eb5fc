//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from face crops using the
//! w600k_r50 ArcFace model. Faces are cropped square around the detected
//! box with a fixed margin and resized to the model input.

use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";
/// Margin added around the detected box before the square crop.
const CROP_MARGIN: f32 = 0.12;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — place the ArcFace model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty (box {0}x{1})")]
    EmptyCrop(f32, f32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding for one detected face.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let crop = crop_face(image, face)?;
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distances are comparable across shots
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess a 112x112 RGB crop into a normalized NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

/// Crop a square region around the face with [`CROP_MARGIN`] padding,
/// clamped to the image bounds, and resize to the ArcFace input size.
fn crop_face(image: &RgbImage, face: &BoundingBox) -> Result<RgbImage, EmbedderError> {
    if face.width <= 0.0 || face.height <= 0.0 {
        return Err(EmbedderError::EmptyCrop(face.width, face.height));
    }

    let (img_w, img_h) = image.dimensions();
    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0) as u32;
    let y0 = (cy - side / 2.0).max(0.0) as u32;
    let x1 = ((cx + side / 2.0) as u32).min(img_w);
    let y1 = ((cy + side / 2.0) as u32).min(img_h);

    if x1 <= x0 || y1 <= y0 {
        return Err(EmbedderError::EmptyCrop(face.width, face.height));
    }

    let cropped = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(image::imageops::resize(
        &cropped,
        ARCFACE_INPUT_SIZE as u32,
        ARCFACE_INPUT_SIZE as u32,
        image::imageops::FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_image(w: u32, h: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([value, value, value]))
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_preprocess_output_shape() {
        let crop = uniform_image(112, 112, 128);
        let tensor = FaceEmbedder::preprocess(&crop);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let crop = uniform_image(112, 112, 128);
        let tensor = FaceEmbedder::preprocess(&crop);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_crop_face_is_input_size() {
        let image = uniform_image(640, 480, 90);
        let crop = crop_face(&image, &bbox(200.0, 150.0, 100.0, 120.0)).unwrap();
        assert_eq!(crop.dimensions(), (112, 112));
    }

    #[test]
    fn test_crop_face_clamps_to_bounds() {
        // Box hanging off the top-left corner
        let image = uniform_image(640, 480, 90);
        let crop = crop_face(&image, &bbox(-20.0, -20.0, 80.0, 80.0)).unwrap();
        assert_eq!(crop.dimensions(), (112, 112));
    }

    #[test]
    fn test_crop_face_rejects_empty_box() {
        let image = uniform_image(640, 480, 90);
        assert!(crop_face(&image, &bbox(10.0, 10.0, 0.0, 0.0)).is_err());
    }
}
