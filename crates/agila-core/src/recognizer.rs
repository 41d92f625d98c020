//! SFace face recognizer via ONNX Runtime.
//!
//! Extracts 128-dimensional embeddings from face crops using the OpenCV Zoo
//! `face_recognition_sface_2021dec` model.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SFACE_INPUT_SIZE: u32 = 112;
// SFace takes raw 0..255 RGB values; no mean/std normalization.
const SFACE_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}: place the SFace model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face crop")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the SFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded SFace model"
        );

        Ok(Self { session })
    }

    /// Extract an embedding from a face crop. The crop is resized to the
    /// model's 112×112 input regardless of its aspect ratio.
    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(RecognizerError::EmptyCrop);
        }

        let input = preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != SFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {SFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}

/// Resize a crop to 112×112 and lay it out as a NCHW RGB float tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = SFACE_INPUT_SIZE as usize;
    let resized = if face.dimensions() == (SFACE_INPUT_SIZE, SFACE_INPUT_SIZE) {
        face.clone()
    } else {
        imageops::resize(face, SFACE_INPUT_SIZE, SFACE_INPUT_SIZE, FilterType::Triangle)
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(160, 160, Rgb([128, 128, 128]));
        let tensor = preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_keeps_raw_rgb() {
        let face = RgbImage::from_pixel(112, 112, Rgb([200, 100, 50]));
        let tensor = preprocess(&face);
        assert_eq!(tensor[[0, 0, 5, 7]], 200.0);
        assert_eq!(tensor[[0, 1, 5, 7]], 100.0);
        assert_eq!(tensor[[0, 2, 5, 7]], 50.0);
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceRecognizer::load("/nonexistent/sface.onnx").err();
        assert!(matches!(err, Some(RecognizerError::ModelNotFound(_))));
    }
}
