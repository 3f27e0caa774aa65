use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Reports the worker count and how many tasks are waiting in the queue.
/// Returns 503 Service Unavailable if the queue cannot be read.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.coordinator.queue().depth().await {
        Ok(depth) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                workers: state.worker_count,
                queue_depth: Some(depth),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
                workers: state.worker_count,
                queue_depth: None,
                error: Some(format!("queue unavailable: {e}")),
            }),
        ),
    }
}
