//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use stagecoach::{
    InMemoryStatusStore, InMemoryWorkQueue, PipelineCoordinator, SharedStatusStore,
    StatusService, StatusServiceConfig, WorkQueue,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::kernel::{BaseArtifactStore, ServerDeps};
use crate::server::routes::{
    get_artifact_handler, get_job_handler, health_handler, index_handler, stream_job_handler,
    submit_job_handler,
};
use crate::stages::{cover_letter_pipeline, StageSettings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<PipelineCoordinator>,
    pub status: StatusService,
    pub artifacts: Arc<dyn BaseArtifactStore>,
    pub worker_count: usize,
}

impl AppState {
    /// Wire the cover letter pipeline over the given store and queue.
    pub fn new(
        deps: &ServerDeps,
        store: SharedStatusStore,
        queue: Arc<dyn WorkQueue>,
        settings: &StageSettings,
        status_config: StatusServiceConfig,
        worker_count: usize,
    ) -> Self {
        let coordinator = PipelineCoordinator::new(store.clone(), queue)
            .with_pipeline(cover_letter_pipeline(deps, settings));

        Self {
            coordinator: Arc::new(coordinator),
            status: StatusService::with_config(store, status_config),
            artifacts: deps.artifacts.clone(),
            worker_count,
        }
    }

    /// In-process store and queue, settings from `config`.
    pub fn in_memory(deps: &ServerDeps, config: &Config) -> Self {
        let settings = StageSettings {
            timeout: config.stage_timeout,
            max_retries_override: config.stage_max_retries,
        };
        let status_config = StatusServiceConfig {
            poll_interval: config.stream_poll_interval,
        };

        Self::new(
            deps,
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryWorkQueue::new()),
            &settings,
            status_config,
            config.worker_count,
        )
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

/// Build the Axum application router
pub fn build_app(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/jobs", post(submit_job_handler))
        .route("/jobs/:job_id", get(get_job_handler))
        .route("/jobs/:job_id/stream", get(stream_job_handler))
        .route("/artifacts/:filename", get(get_artifact_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}
