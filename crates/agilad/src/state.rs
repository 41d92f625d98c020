use std::sync::Arc;

use agila_cloud::{AccountDirectory, ObjectStore};
use agila_core::FeatureStore;

use crate::engine::EngineHandle;

/// Shared handler state.
pub struct AppState {
    pub engine: EngineHandle,
    pub gallery: Arc<FeatureStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub similarity_threshold: f32,
    /// Reported by `/status`.
    pub bucket: String,
}
