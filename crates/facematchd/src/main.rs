use anyhow::{Context, Result};
use facematch_core::{FaceAnalyzer, Gallery, OnnxAnalyzer, ThresholdMatcher};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = config::Config::from_env()?;
    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        reference_dir = %config.reference_dir.display(),
        metric = %config.metric,
        threshold = config.threshold,
        "configuration loaded"
    );

    // Models and gallery load synchronously before the listener opens, so no
    // request can observe a partial gallery.
    let mut analyzer = OnnxAnalyzer::load(&config.model_paths(), config.intra_threads)
        .context("loading ONNX models")?;
    let gallery = Gallery::load(&config.reference_dir, &mut analyzer as &mut dyn FaceAnalyzer)
        .context("loading reference gallery")?;
    if gallery.is_empty() {
        tracing::warn!("reference gallery is empty; every face will be reported as unknown");
    }

    let matcher = ThresholdMatcher::new(config.metric, config.threshold);
    let engine = engine::spawn_engine(Box::new(analyzer), gallery, matcher)?;

    let router = api::create_router(engine, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;

    tracing::info!(addr = %config.bind, "facematchd ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("facematchd shutting down");
    Ok(())
}
