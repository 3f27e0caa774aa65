// Main entry point for the cover letter API server

use anyhow::{Context, Result};
use letter_server::{
    kernel::ServerDeps,
    server::{build_app, AppState},
    Config,
};
use stagecoach::{WorkerPool, WorkerPoolConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,letter_server=debug,stagecoach=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cover letter API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        model = %config.llm_model,
        workers = config.worker_count,
        artifact_dir = %config.artifact_dir.display(),
        "Configuration loaded"
    );

    let deps = ServerDeps::from_config(&config).context("Failed to build stage dependencies")?;
    let state = AppState::in_memory(&deps, &config);

    // Start workers
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::with_config(
        state.coordinator.queue().clone(),
        state.coordinator.clone(),
        WorkerPoolConfig::with_worker_count(config.worker_count),
    )
    .spawn(shutdown.clone());
    tracing::info!(workers = pool.worker_count(), "Worker pool started");

    let app = build_app(state, &config.cors_allowed_origins);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    // Stop workers after the listener has closed
    shutdown.cancel();
    pool.join().await;
    tracing::info!("Workers stopped");

    Ok(())
}
