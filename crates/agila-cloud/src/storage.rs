//! Face image uploads to a Firebase Storage bucket.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use crate::auth::TokenSource;
use crate::error::CloudError;

const PUBLIC_HOST: &str = "https://storage.googleapis.com";

/// Write-only object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `path`, readable by anyone, and return its public URL.
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, CloudError>;
}

/// Object path for one registration image:
/// `faces/{role}/{unique_number}/{name}/face_{index}.jpg`.
///
/// Role and name are lowercased with spaces turned into underscores; the
/// unique number is only trimmed.
pub fn face_object_path(role: &str, unique_number: &str, name: &str, index: usize) -> String {
    let safe = |s: &str| s.replace(' ', "_").to_lowercase();
    format!(
        "faces/{}/{}/{}/face_{index}.jpg",
        safe(role),
        unique_number.trim(),
        safe(name)
    )
}

/// Public download URL for an object, with each path segment percent-encoded.
pub fn public_url(bucket: &str, path: &str) -> Result<String, CloudError> {
    let mut url = Url::parse(PUBLIC_HOST).map_err(|e| CloudError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| CloudError::InvalidUrl(PUBLIC_HOST.to_string()))?
        .pop_if_empty()
        .push(bucket)
        .extend(path.split('/'));
    Ok(url.into())
}

/// GCS JSON API client for one bucket.
pub struct FirebaseStorage {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    tokens: Arc<TokenSource>,
}

impl FirebaseStorage {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        tokens: Arc<TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            tokens,
        }
    }

    fn upload_endpoint(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket)
    }
}

#[async_trait]
impl ObjectStore for FirebaseStorage {
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, CloudError> {
        let token = self.tokens.token().await?;
        let size = bytes.len();

        let response = self
            .http
            .post(self.upload_endpoint())
            .query(&[
                ("uploadType", "media"),
                ("name", path),
                ("predefinedAcl", "publicRead"),
            ])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        CloudError::check("storage", response).await?;

        let url = public_url(&self.bucket, path)?;
        tracing::debug!(bucket = %self.bucket, path, size, "uploaded object");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_object_path_sanitizes() {
        assert_eq!(
            face_object_path("Program Head", " 2021-00123 ", "Juan Dela Cruz", 2),
            "faces/program_head/2021-00123/juan_dela_cruz/face_2.jpg"
        );
    }

    #[test]
    fn test_public_url_plain() {
        assert_eq!(
            public_url("agila-c10a4.firebasestorage.app", "faces/student/1/ana/face_0.jpg").unwrap(),
            "https://storage.googleapis.com/agila-c10a4.firebasestorage.app/faces/student/1/ana/face_0.jpg"
        );
    }

    #[test]
    fn test_public_url_encodes_segments() {
        let url = public_url("b", "faces/student/1/josé_o'neil/face_0.jpg").unwrap();
        assert!(url.starts_with("https://storage.googleapis.com/b/faces/student/1/jos%C3%A9_o"));
        assert!(url.ends_with("/face_0.jpg"));
    }

    #[test]
    fn test_upload_endpoint_trims_slash() {
        let storage = FirebaseStorage::new(
            reqwest::Client::new(),
            "http://localhost:9199/",
            "bucket",
            Arc::new(TokenSource::fixed("t")),
        );
        assert_eq!(
            storage.upload_endpoint(),
            "http://localhost:9199/upload/storage/v1/b/bucket/o"
        );
    }
}
