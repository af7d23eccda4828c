use anyhow::{Context, Result};
use facehash_core::FaceHasher;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http_interface;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model_dir = %config.model_dir.display(),
        backend = config.detector_backend.as_str(),
        hash_match_threshold = config.hash_match_threshold,
        image_match_threshold = config.image_match_threshold,
        "facehashd starting"
    );

    // Load models before accepting connections (fail-fast)
    let hasher = FaceHasher::load(&config.model_options()).context("failed to load face models")?;
    let engine = engine::spawn_engine(hasher, config.queue_depth, config.request_timeout());

    let state = Arc::new(http_interface::AppState {
        engine,
        hash_match_threshold: config.hash_match_threshold,
        image_match_threshold: config.image_match_threshold,
    });
    let app = http_interface::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "facehashd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c; shutting down");
            }
        })
        .await?;

    tracing::info!("facehashd shutting down");
    Ok(())
}
