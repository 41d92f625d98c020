use serde::{Deserialize, Serialize};

/// Bounding box for a detected face in source-image coordinates, with
/// optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// True when the raw box is exactly the whole `frame_width` × `frame_height`
    /// frame, the placeholder some detectors report instead of a face. A box
    /// that only spills past the edges does not count.
    pub fn covers_frame(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x == 0.0
            && self.y == 0.0
            && self.width == frame_width as f32
            && self.height == frame_height as f32
    }

    /// Truncate to integer pixels and clamp into a `frame_width` × `frame_height` frame.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelBox {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as u32).min(max)
            }
        };

        let x1 = clamp(self.x, frame_width);
        let y1 = clamp(self.y, frame_height);
        let x2 = clamp(self.x + self.width, frame_width);
        let y2 = clamp(self.y + self.height, frame_height);

        PixelBox {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }
}

/// Integer face box as reported over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

}

/// Face embedding vector (128-dimensional for SFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero-norm vectors
    /// compare as 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One row of the gallery: a person's name and one of their embeddings.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Best cosine similarity found, floored at 0.0.
    pub similarity: f32,
    /// Name of the matched record; `None` unless `matched`.
    pub label: Option<String>,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceRecord], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher over a linear scan of the gallery.
///
/// The running best starts at 0.0, so negative similarities never match.
/// Only a strictly greater similarity replaces the current best, so the first
/// of several equal rows wins.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceRecord], threshold: f32) -> MatchResult {
        let mut best_sim = 0.0f32;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            let sim = probe.similarity(&record.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                label: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                similarity: best_sim,
                label: None,
            },
        }
    }
}
