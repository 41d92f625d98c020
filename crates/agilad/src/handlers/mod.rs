//! HTTP handlers. Each endpoint answers with its own JSON shape, including
//! on failure, so handlers build responses directly instead of sharing one
//! error type.

mod detect;
mod recognize;
mod register;
mod status;

pub use detect::detect_face;
pub use recognize::try_recognition;
pub use register::register_face;
pub use status::{health, status};

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Accept any body that parses; a missing or malformed body becomes the
/// all-fields-absent request so each handler reports it in its own words.
/// Oversized bodies are still rejected with 413.
fn body_or_default<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(rejection.into_response())
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unusable request body");
            Ok(T::default())
        }
    }
}
