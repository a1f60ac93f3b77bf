use anyhow::{Context, Result};
use facemesh_core::{FaceService, FaceStore, MeshExtractor};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facemeshd starting");

    let store = Arc::new(
        FaceStore::open(&config.data_dir)
            .with_context(|| format!("opening face store {}", config.data_dir.display()))?,
    );

    // Load models synchronously so a missing file fails startup.
    let extractor = MeshExtractor::load(&config.model_dir, config.detection_confidence)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    tracing::info!(dir = %config.model_dir.display(), "models loaded");

    let service = Arc::new(FaceService::new(store, config.thresholds()));
    let engine = engine::spawn_engine(extractor, Arc::clone(&service))?;

    let app = http::router(http::AppState { engine, service }, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facemeshd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            tracing::info!("facemeshd shutting down");
        })
        .await?;

    Ok(())
}
