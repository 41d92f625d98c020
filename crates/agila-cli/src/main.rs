use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use image::ImageFormat;
use serde_json::{json, Value};

/// Registrations upload every image before the server answers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(name = "agila", about = "Agila face service CLI", version)]
struct Cli {
    /// Base URL of the agilad server
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the largest face in an image
    Detect {
        image: PathBuf,
        /// Caller name sent with the request
        #[arg(short, long, default_value = "agila-cli")]
        name: String,
    },
    /// Register a person's face images
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// Student or employee number
        #[arg(short, long)]
        unique_number: String,
        /// Account role; looked up from the account when omitted
        #[arg(short, long)]
        role: Option<String>,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify every face in an image
    Recognize { image: PathBuf },
    /// Show server status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server, REQUEST_TIMEOUT)?;

    let response = match cli.command {
        Commands::Detect { image, name } => {
            client
                .post("/detect_face", json!({ "image": data_url(&image)?, "name": name }))
                .await?
        }
        Commands::Register {
            name,
            email,
            unique_number,
            role,
            images,
        } => {
            let images = images
                .iter()
                .map(|p| data_url(p))
                .collect::<Result<Vec<_>>>()?;
            let mut body = json!({
                "images": images,
                "name": name,
                "email": email,
                "uniqueNumber": unique_number,
            });
            if let Some(role) = role {
                body["role"] = json!(role);
            }
            client.post("/register-face", body).await?
        }
        Commands::Recognize { image } => {
            client
                .post("/try-recognition", json!({ "image": data_url(&image)? }))
                .await?
        }
        Commands::Status => client.get("/status").await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("agila-cli/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("cannot reach {url}"))?;
        Self::read(response).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("cannot reach {url}"))?;
        Self::read(response).await
    }

    /// Error statuses still carry a JSON body worth showing.
    async fn read(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.context("server sent a non-JSON body")?;
        if status.is_server_error() {
            bail!("server error {status}: {body}");
        }
        if !status.is_success() {
            eprintln!("request rejected: {status}");
        }
        Ok(body)
    }
}

/// Encode an image file as a `data:` URL, typed by its extension.
fn data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mime = ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg");
    Ok(format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_uses_extension_mime() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("face.png");
        std::fs::write(&png, [1u8, 2, 3]).unwrap();
        assert_eq!(data_url(&png).unwrap(), "data:image/png;base64,AQID");

        let unknown = dir.path().join("face.bin");
        std::fs::write(&unknown, [1u8, 2, 3]).unwrap();
        assert!(data_url(&unknown).unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stall = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = Client::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = client.get("/status").await.unwrap_err();
        let timed_out = err
            .chain()
            .filter_map(|e| e.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout());
        assert!(timed_out, "unexpected error: {err:#}");
        stall.abort();
    }

    #[test]
    fn test_cli_parses_register() {
        let cli = Cli::try_parse_from([
            "agila", "register", "-n", "Ana", "-e", "ana@example.com", "-u", "7", "a.jpg", "b.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Register { images, role, .. } => {
                assert_eq!(images.len(), 2);
                assert!(role.is_none());
            }
            _ => panic!("expected register"),
        }
        assert_eq!(cli.server, "http://127.0.0.1:5000");
    }
}
