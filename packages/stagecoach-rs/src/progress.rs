//! Progress reporting from inside a running stage.

use std::sync::Mutex;

use serde_json::Value;
use tracing::warn;

use crate::job::JobId;
use crate::snapshot::StatusUpdate;
use crate::store::SharedStatusStore;

/// Writes RUNNING updates for one stage execution.
///
/// Percentages are clamped to 0..=100 and never move backwards, including
/// across retry attempts of the same stage. Store failures while reporting
/// are logged and swallowed: progress is advisory.
pub struct ProgressReporter {
    store: SharedStatusStore,
    job_id: JobId,
    stage: String,
    last_percent: Mutex<u8>,
}

impl ProgressReporter {
    pub fn new(store: SharedStatusStore, job_id: JobId, stage: impl Into<String>) -> Self {
        Self {
            store,
            job_id,
            stage: stage.into(),
            last_percent: Mutex::new(0),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn last_percent(&self) -> u8 {
        *self.last_percent.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn report(&self, percent: u8, label: impl Into<String>) {
        let percent = {
            let mut last = self.last_percent.lock().unwrap_or_else(|e| e.into_inner());
            let next = percent.min(100).max(*last);
            *last = next;
            next
        };

        let update = StatusUpdate::running()
            .with_percent(percent)
            .with_label(label)
            .with_stage(self.stage.clone());
        self.send(update).await;
    }

    /// Attach a detail (e.g. an artifact path) without touching progress.
    pub async fn record_detail(&self, key: impl Into<String>, value: impl Into<Value>) {
        let update = StatusUpdate::running()
            .with_stage(self.stage.clone())
            .with_detail(key, value);
        self.send(update).await;
    }

    async fn send(&self, update: StatusUpdate) {
        if let Err(e) = self.store.write(self.job_id, update).await {
            warn!(job_id = %self.job_id, stage = %self.stage, error = %e, "failed to record progress");
        }
    }
}
