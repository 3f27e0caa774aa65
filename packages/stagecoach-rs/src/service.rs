//! Status query and streaming service.
//!
//! Reads only: the service never writes the store. Streaming is a polling
//! loop so clients see exactly what the store holds, with no separate
//! notification channel to fall out of sync.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::warn;

use crate::error::ServiceError;
use crate::job::JobId;
use crate::snapshot::StatusSnapshot;
use crate::store::SharedStatusStore;

#[derive(Debug, Clone)]
pub struct StatusServiceConfig {
    /// Delay between store polls while streaming.
    pub poll_interval: Duration,
}

impl Default for StatusServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// One item of a status stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A non-terminal snapshot, emitted on first poll and on every change.
    Update(StatusSnapshot),
    /// The terminal snapshot. Always the last event.
    End(StatusSnapshot),
    /// The job id is unknown. Always the only event.
    NotFound(JobId),
}

impl StatusEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            StatusEvent::Update(_) => "update",
            StatusEvent::End(_) => "end",
            StatusEvent::NotFound(_) => "not_found",
        }
    }

    pub fn snapshot(&self) -> Option<&StatusSnapshot> {
        match self {
            StatusEvent::Update(s) | StatusEvent::End(s) => Some(s),
            StatusEvent::NotFound(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct StatusService {
    store: SharedStatusStore,
    config: StatusServiceConfig,
}

struct StreamState {
    store: SharedStatusStore,
    job_id: JobId,
    poll_interval: Duration,
    last: Option<StatusSnapshot>,
    polled: bool,
    done: bool,
}

impl StatusService {
    pub fn new(store: SharedStatusStore) -> Self {
        Self::with_config(store, StatusServiceConfig::default())
    }

    pub fn with_config(store: SharedStatusStore, config: StatusServiceConfig) -> Self {
        Self { store, config }
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<StatusSnapshot, ServiceError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(ServiceError::NotFound(job_id))
    }

    /// Stream the job's snapshot until it is terminal.
    ///
    /// Emits the current snapshot immediately, then each changed snapshot,
    /// and finishes after the terminal one. Store errors are logged and the
    /// poll retried.
    pub fn stream_status(&self, job_id: JobId) -> BoxStream<'static, StatusEvent> {
        let state = StreamState {
            store: self.store.clone(),
            job_id,
            poll_interval: self.config.poll_interval,
            last: None,
            polled: false,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                if state.polled {
                    tokio::time::sleep(state.poll_interval).await;
                }
                state.polled = true;

                let snapshot = match state.store.get(state.job_id).await {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => {
                        state.done = true;
                        return Some((StatusEvent::NotFound(state.job_id), state));
                    }
                    Err(e) => {
                        warn!(job_id = %state.job_id, error = %e, "status poll failed");
                        continue;
                    }
                };

                if snapshot.is_terminal() {
                    state.done = true;
                    return Some((StatusEvent::End(snapshot), state));
                }

                if state.last.as_ref() != Some(&snapshot) {
                    state.last = Some(snapshot.clone());
                    return Some((StatusEvent::Update(snapshot), state));
                }
            }
        })
        .boxed()
    }
}
