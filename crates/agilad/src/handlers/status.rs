use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    version: &'static str,
    /// Rows in the feature file; 0 when it does not exist yet or cannot be
    /// read.
    gallery_size: usize,
    similarity_threshold: f32,
    bucket: String,
}

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /status`
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let gallery = Arc::clone(&state.gallery);
    let gallery_size = match tokio::task::spawn_blocking(move || gallery.len()).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "status: feature file unreadable");
            0
        }
        Err(e) => {
            tracing::warn!(error = %e, "status: gallery task failed");
            0
        }
    };

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        gallery_size,
        similarity_threshold: state.similarity_threshold,
        bucket: state.bucket.clone(),
    })
}
