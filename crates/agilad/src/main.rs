use std::path::PathBuf;
use std::sync::Arc;

use agila_cloud::{FirebaseStorage, Firestore, ServiceAccount, TokenSource};
use agila_core::{FeatureStore, OnnxAnalyzer};
use agilad::config::Config;
use agilad::engine::spawn_engine;
use agilad::server;
use agilad::state::AppState;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agilad", about = "Agila face service daemon", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address (e.g. 0.0.0.0:5000)
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen
            .parse()
            .with_context(|| format!("invalid --listen address {listen:?}"))?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model_dir = %config.model_dir.display(),
        features = %config.features_path.display(),
        threshold = config.similarity_threshold,
        "agilad starting"
    );

    let analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let engine = spawn_engine(Box::new(analyzer), config.engine_queue)?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("agilad/", env!("CARGO_PKG_VERSION")))
        .timeout(config.cloud_timeout)
        .build()?;

    let (tokens, project_id) = match &config.access_token {
        Some(token) => {
            let project_id = config
                .project_id
                .clone()
                .context("project_id is required when access_token is set")?;
            (TokenSource::fixed(token.clone()), project_id)
        }
        None => {
            let account = ServiceAccount::from_file(&config.credentials_path)?;
            let project_id = config
                .project_id
                .clone()
                .unwrap_or_else(|| account.project_id.clone());
            tracing::info!(client = %account.client_email, "using service account credentials");
            (TokenSource::service_account(account, http.clone()), project_id)
        }
    };
    let tokens = Arc::new(tokens);

    let objects = FirebaseStorage::new(
        http.clone(),
        &config.storage_url,
        &config.storage_bucket,
        Arc::clone(&tokens),
    );
    let accounts = Firestore::new(
        http,
        &config.firestore_url,
        project_id.as_str(),
        &config.accounts_collection,
        tokens,
    );

    let state = Arc::new(AppState {
        engine,
        gallery: Arc::new(FeatureStore::new(&config.features_path)),
        objects: Arc::new(objects),
        accounts: Arc::new(accounts),
        similarity_threshold: config.similarity_threshold,
        bucket: config.storage_bucket.clone(),
    });

    let app = server::router(state, config.max_body_bytes);
    server::serve(config.listen, app).await?;

    tracing::info!("agilad stopped");
    Ok(())
}
