//! Job submission and status endpoints.
//!
//! POST /jobs            submit a posting URL, returns 202 with the job id
//! GET  /jobs/:job_id    current status snapshot

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use stagecoach::{JobId, StatusSnapshot, Submission};
use url::Url;

use crate::server::app::AppState;
use crate::server::error::ApiError;
use crate::stages::{COVER_LETTER_PIPELINE, SOURCE_URL, USER_STORY};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub source_url: String,
    #[serde(default)]
    pub user_story: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

fn validate_source_url(raw: &str) -> Result<Url, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::Unprocessable("source_url must not be empty".into()));
    }
    let url = Url::parse(raw)
        .map_err(|e| ApiError::Unprocessable(format!("source_url is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ApiError::Unprocessable(
            "source_url must be an http(s) URL".into(),
        ));
    }
    Ok(url)
}

pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("malformed job id: {raw}")))
}

pub async fn submit_job_handler(
    Extension(state): Extension<AppState>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Unprocessable(e.body_text()))?;
    let url = validate_source_url(&request.source_url)?;

    let mut submission =
        Submission::new(COVER_LETTER_PIPELINE).with_field(SOURCE_URL, url.as_str());
    if let Some(story) = request.user_story.filter(|s| !s.trim().is_empty()) {
        submission = submission.with_field(USER_STORY, story);
    }

    let job = state.coordinator.submit(submission).await?;
    tracing::info!(job_id = %job.id, url = %url, "job submitted");

    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id: job.id })))
}

pub async fn get_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let snapshot = state.status.get_status(job_id).await?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_source_url("https://jobs.example.com/42").is_ok());
        assert!(validate_source_url("  http://example.com  ").is_ok());
    }

    #[test]
    fn rejects_other_urls() {
        for raw in ["", "   ", "not a url", "ftp://example.com/file", "file:///etc/passwd"] {
            assert!(
                matches!(validate_source_url(raw), Err(ApiError::Unprocessable(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_job_id_is_bad_request() {
        assert!(matches!(parse_job_id("nope"), Err(ApiError::BadRequest(_))));
        assert!(parse_job_id(&JobId::new().to_string()).is_ok());
    }
}
