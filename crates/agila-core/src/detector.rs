//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image into the 640×640 model input, decodes the three
//! stride levels (anchor-free, two anchors per cell) and suppresses
//! overlapping boxes with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}: place det_10g.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps letterboxed model coordinates back to the source image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_outputs = map_stride_outputs(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Detect faces in an RGB image, returning boxes sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[level];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };

            let level_outputs = StrideLevel {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(level_outputs.decode(&letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(count = faces.len(), "SCRFD detections after NMS");
        Ok(faces)
    }
}

/// Letterbox an RGB image into a normalized NCHW tensor.
///
/// Padding is filled with the mean so it normalizes to 0.0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE as usize;
    let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);

    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let off_x = letterbox.pad_x.floor() as usize;
    let off_y = letterbox.pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Locate score/bbox/kps outputs per stride by name ("score_8", "bbox_16", ...),
/// falling back to the standard positional layout
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn map_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw outputs of one stride level.
struct StrideLevel<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideLevel<'_> {
    fn decode(&self, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
        let grid = SCRFD_INPUT_SIZE as usize / self.stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let step = self.stride as f32;

        let mut faces = Vec::new();
        for idx in 0..anchors {
            let score = self.scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                continue;
            }
            let Some(dist) = self.bboxes.get(idx * 4..idx * 4 + 4) else {
                continue;
            };

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * step;
            let anchor_y = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.to_source(anchor_x - dist[0] * step, anchor_y - dist[1] * step);
            let (x2, y2) = letterbox.to_source(anchor_x + dist[2] * step, anchor_y + dist[3] * step);

            let landmarks = self.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_source(anchor_x + k[i * 2] * step, anchor_y + k[i * 2 + 1] * step)
                })
            });

            faces.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            });
        }
        faces
    }
}

/// Non-maximum suppression; the result is sorted by confidence, highest first.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = face(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let result = nms(
            vec![
                face(5.0, 5.0, 100.0, 100.0, 0.8),
                face(200.0, 200.0, 50.0, 50.0, 0.7),
                face(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = result.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(640, 480, 640);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        let (x, y) = lb.to_source(100.0, 180.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_letterbox_upscale_roundtrip() {
        let lb = Letterbox::fit(320, 240, 640);
        let (sx, sy) = (100.0f32, 50.0f32);
        let (x, y) = lb.to_source(sx * lb.scale + lb.pad_x, sy * lb.scale + lb.pad_y);
        assert!((x - sx).abs() < 0.1, "x: {x}");
        assert!((y - sy).abs() < 0.1, "y: {y}");
    }

    #[test]
    fn test_preprocess_pads_with_zero_and_keeps_channels() {
        let img = RgbImage::from_pixel(640, 480, Rgb([255, 127, 0]));
        let (tensor, _) = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // top padding band
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        // image area, channel order R, G, B
        assert!((tensor[[0, 0, 300, 300]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2);
        assert!((tensor[[0, 2, 300, 300]] - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = 640 / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // cell (x=2, y=1), second anchor
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.95;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 2.0]);

        let level = StrideLevel { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let faces = level.decode(&lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (32.0, 0.0, 64.0, 96.0));
        assert_eq!(f.landmarks.unwrap()[0], (64.0, 32.0));
    }

    #[test]
    fn test_map_stride_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(map_stride_outputs(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_map_stride_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (i + 428).to_string()).collect();
        assert_eq!(map_stride_outputs(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
