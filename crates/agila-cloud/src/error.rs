use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("credentials: {0}")]
    Credentials(String),
    #[error("token signing: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unexpected response: {0}")]
    Response(String),
}

impl CloudError {
    /// Turn a non-2xx response into `CloudError::Status`, keeping the body for the log.
    pub(crate) async fn check(
        service: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::Status {
            service,
            status: status.as_u16(),
            body,
        })
    }
}
