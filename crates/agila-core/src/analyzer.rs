//! The inference seam the daemon talks to.

use image::RgbImage;
use std::path::Path;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection and embedding extraction.
///
/// Implementations hold inference sessions that need exclusive access, so
/// both calls take `&mut self`.
pub trait FaceAnalyzer {
    /// Detect faces, highest confidence first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Extract an embedding from an image that is already a face crop.
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError>;
}

/// SCRFD + SFace on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let recognizer_path = model_dir.join(RECOGNIZER_MODEL_FILE);

        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&recognizer_path.to_string_lossy())?;

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.extract(face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_detector_first() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxAnalyzer::load(dir.path()).err();
        assert!(matches!(
            err,
            Some(AnalyzerError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }
}
