//! Test doubles for stages and stores.
//!
//! `ScriptedStage` replays a queue of results; `RecordingStatusStore` keeps
//! every write it receives so tests can assert on the sequence, not just the
//! final snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StageError, StoreError};
use crate::job::JobId;
use crate::snapshot::{JobState, StatusSnapshot, StatusUpdate};
use crate::stage::{Stage, StageInput, StageOutput};
use crate::store::{InMemoryStatusStore, StatusStore};

// =============================================================================
// ScriptedStage
// =============================================================================

/// A stage that returns pre-scripted results in order.
///
/// The last scripted result repeats once the script is exhausted.
pub struct ScriptedStage {
    script: Mutex<VecDeque<Result<StageOutput, StageError>>>,
    progress: Vec<(u8, String)>,
    delay: Option<Duration>,
    panics_remaining: AtomicUsize,
    invocations: AtomicUsize,
}

impl ScriptedStage {
    pub fn new(script: Vec<Result<StageOutput, StageError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            progress: Vec::new(),
            delay: None,
            panics_remaining: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(output: StageOutput) -> Self {
        Self::new(vec![Ok(output)])
    }

    pub fn failing(error: StageError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn then_ok(self, output: StageOutput) -> Self {
        self.push(Ok(output))
    }

    pub fn then_err(self, error: StageError) -> Self {
        self.push(Err(error))
    }

    /// Report these `(percent, label)` ticks on every invocation.
    pub fn with_progress(mut self, ticks: Vec<(u8, &str)>) -> Self {
        self.progress = ticks.into_iter().map(|(p, l)| (p, l.to_string())).collect();
        self
    }

    /// Sleep before producing each result.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic on the first `count` invocations.
    pub fn with_panics(self, count: usize) -> Self {
        self.panics_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn push(self, result: Result<StageOutput, StageError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
        self
    }

    fn next_result(&self) -> Result<StageOutput, StageError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| Ok(StageOutput::new()))
        } else {
            script.front().cloned().unwrap_or_else(|| Ok(StageOutput::new()))
        }
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let should_panic = self
            .panics_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("scripted panic in stage {}", input.stage);
        }

        for (percent, label) in &self.progress {
            input.progress.report(*percent, label.clone()).await;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.next_result()
    }
}

// =============================================================================
// RecordingStatusStore
// =============================================================================

/// In-memory store that also records every write, in order.
#[derive(Default)]
pub struct RecordingStatusStore {
    inner: InMemoryStatusStore,
    writes: Mutex<HashMap<JobId, Vec<StatusUpdate>>>,
    fail_success_writes: bool,
}

impl RecordingStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every SUCCESS write with a backend error.
    pub fn failing_success_writes() -> Self {
        Self {
            fail_success_writes: true,
            ..Self::default()
        }
    }

    /// Every update written for `job_id`, including ones the merge policy dropped.
    pub fn updates(&self, job_id: JobId) -> Vec<StatusUpdate> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, job_id: JobId, update: &StatusUpdate) {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job_id)
            .or_default()
            .push(update.clone());
    }
}

#[async_trait]
impl StatusStore for RecordingStatusStore {
    async fn create(&self, job_id: JobId, update: StatusUpdate) -> Result<StatusSnapshot, StoreError> {
        self.record(job_id, &update);
        self.inner.create(job_id, update).await
    }

    async fn write(&self, job_id: JobId, update: StatusUpdate) -> Result<StatusSnapshot, StoreError> {
        self.record(job_id, &update);
        if self.fail_success_writes && update.state == JobState::Success {
            return Err(StoreError::Backend("success writes disabled".to_string()));
        }
        self.inner.write(job_id, update).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<StatusSnapshot>, StoreError> {
        self.inner.get(job_id).await
    }
}
