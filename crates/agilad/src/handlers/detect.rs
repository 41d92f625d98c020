use std::sync::Arc;

use agila_core::decode::decode_data_url;
use agila_core::PixelBox;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::body_or_default;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DetectRequest {
    image: Option<String>,
    /// Only its presence is checked; it labels the log line.
    name: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    detected: bool,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    face_box: Option<PixelBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl DetectResponse {
    fn found(face_box: PixelBox) -> Self {
        Self {
            detected: true,
            face_box: Some(face_box),
            message: None,
        }
    }

    fn not_found(message: &'static str) -> Self {
        Self {
            detected: false,
            face_box: None,
            message: Some(message),
        }
    }
}

/// `POST /detect_face`: box of the largest face in the image.
pub async fn detect_face(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Response {
    let req = match body_or_default(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    let (Some(image), Some(name)) = (req.image, req.name) else {
        return reply(StatusCode::BAD_REQUEST, DetectResponse::not_found("Invalid request"));
    };

    let name = match name {
        Value::String(s) => s,
        other => other.to_string(),
    };

    let image = match decode_data_url(&image) {
        Ok(image) => image,
        Err(e) => {
            tracing::info!(name = %name, error = %e, "detect_face: undecodable image");
            return reply(StatusCode::BAD_REQUEST, DetectResponse::not_found("Invalid image data"));
        }
    };
    let (width, height) = image.dimensions();

    let faces = match state.engine.detect(image).await {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "detect_face: detection failed");
            return reply(StatusCode::OK, DetectResponse::not_found("Face detection failed"));
        }
    };

    match largest(faces.iter().map(|f| f.to_pixels(width, height))) {
        Some(face_box) => {
            tracing::debug!(name = %name, faces = faces.len(), ?face_box, "detect_face: face found");
            reply(StatusCode::OK, DetectResponse::found(face_box))
        }
        None => reply(StatusCode::OK, DetectResponse::not_found("No face detected")),
    }
}

/// The box with the greatest area; the earliest wins ties. Zero-area boxes
/// never qualify.
fn largest(boxes: impl Iterator<Item = PixelBox>) -> Option<PixelBox> {
    let mut best: Option<PixelBox> = None;
    for candidate in boxes {
        let best_area = best.map(|b| b.area()).unwrap_or(0);
        if candidate.area() > best_area {
            best = Some(candidate);
        }
    }
    best
}

fn reply(status: StatusCode, body: DetectResponse) -> Response {
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(x: u32, width: u32, height: u32) -> PixelBox {
        PixelBox { x, y: 0, width, height }
    }

    #[test]
    fn test_largest_prefers_area_then_order() {
        let boxes = vec![px(0, 10, 10), px(1, 20, 5), px(2, 5, 20), px(3, 11, 10)];
        assert_eq!(largest(boxes.into_iter()), Some(px(3, 11, 10)));

        let ties = vec![px(0, 10, 10), px(1, 20, 5)];
        assert_eq!(largest(ties.into_iter()), Some(px(0, 10, 10)));
    }

    #[test]
    fn test_largest_ignores_empty_boxes() {
        assert_eq!(largest(vec![px(0, 0, 10)].into_iter()), None);
        assert_eq!(largest(std::iter::empty()), None);
    }
}
