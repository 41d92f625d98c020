use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
const DEFAULT_BUCKET: &str = "agila-c10a4.firebasestorage.app";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_CLOUD_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid listen address {0:?}")]
    Listen(String),
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// The embeddings gallery file.
    pub features_path: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Service-account key file used to mint access tokens.
    pub credentials_path: PathBuf,
    /// Pre-minted bearer token; skips the service-account exchange when set.
    pub access_token: Option<String>,
    /// Firestore project; defaults to the service account's project.
    pub project_id: Option<String>,
    pub storage_bucket: String,
    pub storage_url: String,
    pub firestore_url: String,
    /// Collection id searched (as a collection group) for account documents.
    pub accounts_collection: String,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Requests that may wait for the engine thread.
    pub engine_queue: usize,
    /// Bound on each OAuth, Storage and Firestore call.
    pub cloud_timeout: Duration,
}

/// The optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub features_path: Option<PathBuf>,
    pub similarity_threshold: Option<f32>,
    pub credentials_path: Option<PathBuf>,
    pub access_token: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub storage_url: Option<String>,
    pub firestore_url: Option<String>,
    pub accounts_collection: Option<String>,
    pub max_body_bytes: Option<usize>,
    pub engine_queue: Option<usize>,
    pub cloud_timeout_secs: Option<u64>,
}

impl Config {
    /// Load from an optional TOML file, then `AGILA_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let display = path.display().to_string();
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: display.clone(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: display,
                    source,
                })?
            }
            None => FileConfig::default(),
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Merge file values and an environment lookup over the defaults.
    /// Environment wins over the file.
    pub fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let string = |key: &str, file_value: Option<String>| env(key).or(file_value);
        let trimmed = |key: &str| env(key).map(|v| v.trim().to_string());

        let listen = string("AGILA_LISTEN", file.listen).unwrap_or_else(|| DEFAULT_LISTEN.into());
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::Listen(listen.clone()))?;

        Ok(Self {
            listen,
            model_dir: trimmed("AGILA_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(agila_core::default_model_dir),
            features_path: trimmed("AGILA_FEATURES_PATH")
                .map(PathBuf::from)
                .or(file.features_path)
                .unwrap_or_else(|| PathBuf::from("features.csv")),
            similarity_threshold: env("AGILA_SIMILARITY_THRESHOLD")
                .and_then(|v| parse_env("AGILA_SIMILARITY_THRESHOLD", &v))
                .or(file.similarity_threshold)
                .unwrap_or(agila_core::DEFAULT_SIMILARITY_THRESHOLD),
            credentials_path: trimmed("AGILA_CREDENTIALS")
                .map(PathBuf::from)
                .or(file.credentials_path)
                .unwrap_or_else(|| PathBuf::from("serviceAccountKey.json")),
            access_token: string("AGILA_ACCESS_TOKEN", file.access_token),
            project_id: string("AGILA_PROJECT_ID", file.project_id),
            storage_bucket: string("AGILA_STORAGE_BUCKET", file.storage_bucket)
                .unwrap_or_else(|| DEFAULT_BUCKET.into()),
            storage_url: string("AGILA_STORAGE_URL", file.storage_url)
                .unwrap_or_else(|| agila_cloud::DEFAULT_STORAGE_URL.into()),
            firestore_url: string("AGILA_FIRESTORE_URL", file.firestore_url)
                .unwrap_or_else(|| agila_cloud::DEFAULT_FIRESTORE_URL.into()),
            accounts_collection: file.accounts_collection.unwrap_or_else(|| "accounts".into()),
            max_body_bytes: env("AGILA_MAX_BODY_BYTES")
                .and_then(|v| parse_env("AGILA_MAX_BODY_BYTES", &v))
                .or(file.max_body_bytes)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            engine_queue: file.engine_queue.unwrap_or(8),
            cloud_timeout: Duration::from_secs(
                env("AGILA_CLOUD_TIMEOUT_SECS")
                    .and_then(|v| parse_env("AGILA_CLOUD_TIMEOUT_SECS", &v))
                    .or(file.cloud_timeout_secs)
                    .unwrap_or(DEFAULT_CLOUD_TIMEOUT_SECS)
                    .max(1),
            ),
        })
    }
}

/// Parse an environment value, warning and ignoring it when malformed.
fn parse_env<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "ignoring malformed environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(FileConfig::default(), env_of(&[])).unwrap();
        assert_eq!(config.listen, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.features_path, PathBuf::from("features.csv"));
        assert!((config.similarity_threshold - 0.9).abs() < 1e-6);
        assert_eq!(config.storage_bucket, DEFAULT_BUCKET);
        assert_eq!(config.accounts_collection, "accounts");
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert!(config.access_token.is_none());
        assert_eq!(config.cloud_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_cloud_timeout_sources() {
        let file: FileConfig = toml::from_str("cloud_timeout_secs = 10").unwrap();
        let config = Config::from_sources(file, env_of(&[])).unwrap();
        assert_eq!(config.cloud_timeout, Duration::from_secs(10));

        let env = env_of(&[("AGILA_CLOUD_TIMEOUT_SECS", "0")]);
        let config = Config::from_sources(FileConfig::default(), env).unwrap();
        assert_eq!(config.cloud_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:8000"
            similarity_threshold = 0.8
            storage_bucket = "from-file"
            "#,
        )
        .unwrap();
        let env = env_of(&[
            ("AGILA_SIMILARITY_THRESHOLD", "0.75"),
            ("AGILA_FEATURES_PATH", "/var/lib/agila/features.csv"),
        ]);
        let config = Config::from_sources(file, env).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8000".parse().unwrap());
        assert!((config.similarity_threshold - 0.75).abs() < 1e-6);
        assert_eq!(config.storage_bucket, "from-file");
        assert_eq!(config.features_path, PathBuf::from("/var/lib/agila/features.csv"));
    }

    #[test]
    fn test_malformed_env_falls_back() {
        let file = FileConfig {
            similarity_threshold: Some(0.6),
            ..FileConfig::default()
        };
        let config =
            Config::from_sources(file, env_of(&[("AGILA_SIMILARITY_THRESHOLD", "high")])).unwrap();
        assert!((config.similarity_threshold - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_bad_listen_address() {
        let err = Config::from_sources(FileConfig::default(), env_of(&[("AGILA_LISTEN", "nowhere")]));
        assert!(matches!(err, Err(ConfigError::Listen(_))));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("treshold = 0.5").is_err());
    }
}
