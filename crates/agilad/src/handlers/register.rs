use std::sync::Arc;

use agila_cloud::{face_object_path, Account, CloudError};
use agila_core::decode::{data_url_bytes, decode_data_url, resize_exact};
use agila_core::{Embedding, GalleryError, FACE_CROP_SIZE};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::body_or_default;
use crate::engine::EngineError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    images: Option<Vec<String>>,
    name: Option<String>,
    email: Option<String>,
    #[serde(rename = "uniqueNumber")]
    unique_number: Option<Value>,
    role: Option<String>,
}

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("Missing data")]
    MissingData,
    #[error("Unique number is required")]
    MissingUniqueNumber,
    #[error("Missing 'role'")]
    MissingRole,
    #[error("Failed to upload any images")]
    NoUploads,
    #[error("No valid face embeddings found")]
    NoEmbeddings,
    #[error("{0}")]
    Cloud(#[from] CloudError),
    #[error("{0}")]
    Gallery(#[from] GalleryError),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RegisterError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingData | Self::MissingUniqueNumber | Self::MissingRole | Self::NoEmbeddings => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegisterError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "register-face failed");
        }
        (status, Json(json!({ "success": false, "message": self.to_string() }))).into_response()
    }
}

/// A validated registration.
struct Registration {
    images: Vec<String>,
    name: String,
    email: String,
    unique_number: String,
    role: String,
}

/// `POST /register-face`: store a person's face images and embeddings and
/// flag their account.
pub async fn register_face(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let req = match body_or_default(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match register(&state, req).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn register(state: &AppState, req: RegisterRequest) -> Result<(), RegisterError> {
    let request_id = format!("reg-{}", uuid::Uuid::new_v4());

    let (Some(images), Some(name), Some(email)) = (req.images, req.name, req.email) else {
        return Err(RegisterError::MissingData);
    };

    let unique_number = req
        .unique_number
        .as_ref()
        .map(unique_number_text)
        .unwrap_or_default();
    if unique_number.is_empty() {
        return Err(RegisterError::MissingUniqueNumber);
    }

    // An explicit role wins; otherwise take it from the account document.
    let mut account: Option<Account> = None;
    let mut role = req.role.unwrap_or_default().trim().to_string();
    if role.is_empty() {
        account = state.accounts.find_by_email(&email).await?;
        role = account.as_ref().and_then(|a| a.role.clone()).unwrap_or_default();
    }
    if role.is_empty() {
        return Err(RegisterError::MissingRole);
    }

    let registration = Registration {
        images,
        name,
        email,
        unique_number,
        role,
    };
    tracing::info!(
        request_id = %request_id,
        name = %registration.name,
        role = %registration.role,
        images = registration.images.len(),
        "register-face"
    );

    let urls = upload_images(state, &registration, &request_id).await;
    if urls.is_empty() {
        return Err(RegisterError::NoUploads);
    }

    let embeddings = extract_embeddings(state, &registration.images, &request_id).await?;
    if embeddings.is_empty() {
        return Err(RegisterError::NoEmbeddings);
    }

    let gallery = Arc::clone(&state.gallery);
    let name = registration.name.clone();
    let rows = embeddings.len();
    tokio::task::spawn_blocking(move || gallery.append(&name, &embeddings)).await??;

    let account = match account {
        Some(account) => Some(account),
        None => state.accounts.find_by_email(&registration.email).await?,
    };
    match account {
        Some(account) => {
            state.accounts.mark_face_registered(&account, &urls).await?;
            tracing::info!(request_id = %request_id, document = %account.document, "account marked face-registered");
        }
        None => tracing::warn!(
            request_id = %request_id,
            email = %registration.email,
            "no account with this email; face data not linked"
        ),
    }

    tracing::info!(request_id = %request_id, rows, uploads = urls.len(), "registration stored");
    Ok(())
}

/// Upload every image's original bytes. Failures are logged and skipped.
async fn upload_images(state: &AppState, reg: &Registration, request_id: &str) -> Vec<String> {
    let mut urls = Vec::with_capacity(reg.images.len());
    for (idx, data_url) in reg.images.iter().enumerate() {
        let bytes = match data_url_bytes(data_url) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(request_id, image = idx, error = %e, "skipping upload of undecodable image");
                continue;
            }
        };

        let path = face_object_path(&reg.role, &reg.unique_number, &reg.name, idx);
        match state.objects.put_public(&path, bytes, "image/jpeg").await {
            Ok(url) => urls.push(url),
            Err(e) => tracing::warn!(request_id, image = idx, path = %path, error = %e, "upload failed"),
        }
    }
    urls
}

/// Decode, resize and embed every image. Undecodable images and failed
/// extractions are logged and skipped.
async fn extract_embeddings(
    state: &AppState,
    images: &[String],
    request_id: &str,
) -> Result<Vec<Embedding>, RegisterError> {
    let mut crops = Vec::with_capacity(images.len());
    let mut indices = Vec::with_capacity(images.len());
    for (idx, data_url) in images.iter().enumerate() {
        match decode_data_url(data_url) {
            Ok(image) => {
                crops.push(resize_exact(&image, FACE_CROP_SIZE, FACE_CROP_SIZE));
                indices.push(idx);
            }
            Err(e) => tracing::warn!(request_id, image = idx, error = %e, "skipping undecodable image"),
        }
    }
    if crops.is_empty() {
        return Ok(Vec::new());
    }

    let results = state.engine.embed_many(crops).await?;
    let mut embeddings = Vec::with_capacity(results.len());
    for (idx, result) in indices.into_iter().zip(results) {
        match result {
            Ok(embedding) => embeddings.push(embedding),
            Err(e) => tracing::warn!(request_id, image = idx, error = %e, "embedding failed"),
        }
    }
    Ok(embeddings)
}

/// `uniqueNumber` may arrive as a string or a number.
fn unique_number_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_number_text() {
        assert_eq!(unique_number_text(&json!(" 2021-001 ")), "2021-001");
        assert_eq!(unique_number_text(&json!(20210001)), "20210001");
        assert_eq!(unique_number_text(&json!(null)), "");
        assert_eq!(unique_number_text(&json!(["x"])), "");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RegisterError::MissingRole.status(), StatusCode::BAD_REQUEST);
        assert_eq!(RegisterError::NoEmbeddings.status(), StatusCode::BAD_REQUEST);
        assert_eq!(RegisterError::NoUploads.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
