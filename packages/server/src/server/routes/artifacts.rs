//! GET /artifacts/:filename
//!
//! Serves the intermediate files stages write (page HTML, extracted and
//! filtered text, the letter) as plain text.

use axum::{
    extract::{Extension, Path},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
};

use crate::kernel::ArtifactError;
use crate::server::app::AppState;
use crate::server::error::ApiError;

pub async fn get_artifact_handler(
    Extension(state): Extension<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let content = state.artifacts.load(&filename).await.map_err(|e| match e {
        ArtifactError::InvalidName(name) => {
            ApiError::BadRequest(format!("invalid artifact name: {name}"))
        }
        other => ApiError::Internal(other.into()),
    })?;

    let content =
        content.ok_or_else(|| ApiError::NotFound(format!("artifact {filename} not found")))?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], content))
}
