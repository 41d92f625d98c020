//! agila-cloud: Object storage and document store access.
//!
//! Face images go to a Firebase Storage bucket through the GCS JSON API;
//! account flags are written to Firestore through its REST API. Both sit
//! behind traits so the daemon can run against fakes.

pub mod auth;
pub mod error;
pub mod firestore;
pub mod storage;

pub use auth::{ServiceAccount, TokenSource};
pub use error::CloudError;
pub use firestore::{Account, AccountDirectory, Firestore};
pub use storage::{face_object_path, FirebaseStorage, ObjectStore};

/// Default GCS JSON API endpoint.
pub const DEFAULT_STORAGE_URL: &str = "https://storage.googleapis.com";

/// Default Firestore REST endpoint.
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com";
