use std::sync::Arc;

use agila_core::decode::{crop_box, decode_data_url, resize_exact};
use agila_core::{CosineMatcher, Matcher, PixelBox, FACE_CROP_SIZE, RECOGNITION_FRAME};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::body_or_default;
use crate::state::AppState;

const UNKNOWN: &str = "Unknown";
const EMBEDDING_FAILED: &str = "Embedding failed";

#[derive(Debug, Default, Deserialize)]
pub struct RecognitionRequest {
    image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecognitionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    detected_faces: usize,
    results: Vec<FaceResult>,
}

#[derive(Debug, Serialize)]
pub struct FaceResult {
    success: bool,
    name: String,
    similarity: f32,
    #[serde(rename = "box")]
    face_box: PixelBox,
}

impl RecognitionResponse {
    fn failure(message: impl Into<String>, detected_faces: usize) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            detected_faces,
            results: Vec::new(),
        }
    }
}

/// `POST /try-recognition`: identify every face in a live frame against the
/// gallery.
pub async fn try_recognition(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RecognitionRequest>, JsonRejection>,
) -> Response {
    let req = match body_or_default(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };
    let Some(image) = req.image else {
        return reply(StatusCode::BAD_REQUEST, RecognitionResponse::failure("No image provided", 0));
    };

    let request_id = format!("rec-{}", uuid::Uuid::new_v4());
    match recognize(&state, &image, &request_id).await {
        Ok(response) => response,
        Err(message) => {
            tracing::error!(request_id = %request_id, error = %message, "try-recognition failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, RecognitionResponse::failure(message, 0))
        }
    }
}

/// Everything after body validation. `Err` carries the message of an
/// unexpected failure.
async fn recognize(state: &AppState, image: &str, request_id: &str) -> Result<Response, String> {
    let image = match decode_data_url(image) {
        Ok(image) => image,
        Err(e) => {
            tracing::info!(request_id, error = %e, "try-recognition: undecodable image");
            return Ok(reply(StatusCode::BAD_REQUEST, RecognitionResponse::failure("Invalid image", 0)));
        }
    };

    let (frame_w, frame_h) = RECOGNITION_FRAME;
    let frame = resize_exact(&image, frame_w, frame_h);
    let faces = state
        .engine
        .detect(frame.clone())
        .await
        .map_err(|e| e.to_string())?;

    if faces.is_empty() {
        return Ok(reply(StatusCode::OK, RecognitionResponse::failure("No face detected", 0)));
    }

    let gallery = Arc::clone(&state.gallery);
    let records = tokio::task::spawn_blocking(move || gallery.load())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
    let Some(records) = records else {
        let message = format!("{} not found", gallery_file_name(state));
        return Ok(reply(StatusCode::BAD_REQUEST, RecognitionResponse::failure(message, faces.len())));
    };

    let boxes: Vec<PixelBox> = faces
        .iter()
        .filter(|f| !f.covers_frame(frame_w, frame_h))
        .map(|f| f.to_pixels(frame_w, frame_h))
        .collect();

    let mut results: Vec<Option<FaceResult>> = Vec::with_capacity(boxes.len());
    let mut crops = Vec::new();
    let mut crop_slots = Vec::new();
    for face_box in &boxes {
        match crop_box(&frame, *face_box) {
            Ok(crop) => {
                crops.push(resize_exact(&crop, FACE_CROP_SIZE, FACE_CROP_SIZE));
                crop_slots.push(results.len());
                results.push(None);
            }
            Err(e) => {
                tracing::debug!(request_id, ?face_box, error = %e, "unusable face box");
                results.push(Some(embedding_failed(*face_box)));
            }
        }
    }

    if !crops.is_empty() {
        let embeddings = state.engine.embed_many(crops).await.map_err(|e| e.to_string())?;
        for (slot, embedding) in crop_slots.into_iter().zip(embeddings) {
            let face_box = boxes[slot];
            results[slot] = Some(match embedding {
                Ok(probe) => {
                    let m = CosineMatcher.compare(&probe, &records, state.similarity_threshold);
                    FaceResult {
                        success: m.matched,
                        name: m.label.unwrap_or_else(|| UNKNOWN.to_string()),
                        similarity: m.similarity,
                        face_box,
                    }
                }
                Err(e) => {
                    tracing::warn!(request_id, ?face_box, error = %e, "embedding failed");
                    embedding_failed(face_box)
                }
            });
        }
    }

    let results: Vec<FaceResult> = results.into_iter().flatten().collect();
    tracing::info!(
        request_id,
        detected = faces.len(),
        evaluated = results.len(),
        matched = results.iter().filter(|r| r.success).count(),
        gallery = records.len(),
        "try-recognition"
    );

    Ok(reply(
        StatusCode::OK,
        RecognitionResponse {
            success: true,
            message: None,
            detected_faces: results.len(),
            results,
        },
    ))
}

fn embedding_failed(face_box: PixelBox) -> FaceResult {
    FaceResult {
        success: false,
        name: EMBEDDING_FAILED.to_string(),
        similarity: 0.0,
        face_box,
    }
}

fn gallery_file_name(state: &AppState) -> String {
    state
        .gallery
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| state.gallery.path().display().to_string())
}

fn reply(status: StatusCode, body: RecognitionResponse) -> Response {
    (status, Json(body)).into_response()
}
