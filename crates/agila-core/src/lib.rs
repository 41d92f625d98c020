//! agila-core: Face detection, embedding extraction and gallery matching.
//!
//! Uses SCRFD for face detection and SFace for 128-dimensional face
//! embeddings, both running via ONNX Runtime for CPU inference. Enrolled
//! embeddings live in a flat `features.csv` file scanned linearly.

pub mod analyzer;
pub mod decode;
pub mod detector;
pub mod gallery;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use decode::ImageError;
pub use detector::FaceDetector;
pub use gallery::{FeatureStore, GalleryError};
pub use recognizer::FaceRecognizer;
pub use types::{
    BoundingBox, CosineMatcher, Embedding, FaceRecord, MatchResult, Matcher, PixelBox,
};

/// Side length registration images and recognition crops are resized to
/// before embedding extraction.
pub const FACE_CROP_SIZE: u32 = 160;

/// Recognition frames are resized to this (width, height) before detection.
pub const RECOGNITION_FRAME: (u32, u32) = (640, 480);

/// Default cosine similarity a probe must reach to count as a match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.9;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// File name of the SFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// Default model directory: `$XDG_DATA_HOME/agila/models`, falling back to
/// `$HOME/.local/share/agila/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("agila/models")
}
