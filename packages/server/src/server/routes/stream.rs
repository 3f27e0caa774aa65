//! SSE streaming endpoint.
//!
//! GET /jobs/:job_id/stream
//!
//! Sends an `update` event for each new non-terminal snapshot and a final
//! `end` event carrying the terminal snapshot, then closes. Unknown ids get a
//! single `not_found` event.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde_json::json;
use stagecoach::StatusEvent;

use super::jobs::parse_job_id;
use crate::server::app::AppState;
use crate::server::error::ApiError;

fn to_sse_event(event: &StatusEvent) -> Event {
    let base = Event::default().event(event.name());
    let event = match event {
        StatusEvent::Update(snapshot) | StatusEvent::End(snapshot) => {
            base.clone().json_data(snapshot)
        }
        StatusEvent::NotFound(job_id) => base
            .clone()
            .json_data(json!({ "job_id": job_id.to_string(), "error": "job not found" })),
    };
    event.unwrap_or(base)
}

pub async fn stream_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let job_id = parse_job_id(&job_id)?;

    let events = state
        .status
        .stream_status(job_id)
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
