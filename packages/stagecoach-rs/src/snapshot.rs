//! Status snapshots and the write-merge policy.
//!
//! A snapshot is the externally visible state of one job. Writes arrive as
//! [`StatusUpdate`]s and are folded in by [`StatusSnapshot::apply`]:
//!
//! - non-SUCCESS writes merge: only the fields the update carries change
//! - a SUCCESS write replaces the snapshot wholesale
//! - once terminal, the snapshot only accepts a repeat of the same terminal state
//!
//! The policy is pure so that every [`StatusStore`](crate::store::StatusStore)
//! backend can share it inside its own per-key critical section.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::job::JobId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }
}

/// Structured failure attached to a FAILURE snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Name of the stage (or handler) the failure is attributed to.
    pub stage: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: stage.into(),
        }
    }

    /// Human-readable label for the failure.
    pub fn summary(&self) -> String {
        format!("{} failed: {}", self.stage, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// What a write did to the stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEffect {
    Merged,
    Replaced,
    /// The snapshot was already terminal and the write was dropped.
    Ignored,
}

impl StatusSnapshot {
    /// Fresh PENDING snapshot with no fields set.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Pending,
            progress_percent: None,
            label: None,
            stage: None,
            error: None,
            output: None,
            details: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// A snapshot holding exactly the fields of `update`.
    pub fn from_update(job_id: JobId, update: StatusUpdate) -> Self {
        Self {
            job_id,
            state: update.state,
            progress_percent: update.progress_percent,
            label: update.label,
            stage: update.stage,
            error: update.error,
            output: update.output,
            details: update.details,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Fold `update` into this snapshot.
    pub fn apply(&mut self, update: StatusUpdate) -> WriteEffect {
        if self.state.is_terminal() && update.state != self.state {
            return WriteEffect::Ignored;
        }

        if update.state == JobState::Success {
            *self = Self::from_update(self.job_id, update);
            return WriteEffect::Replaced;
        }

        self.state = update.state;
        if let Some(percent) = update.progress_percent {
            self.progress_percent = Some(percent);
        }
        if let Some(label) = update.label {
            self.label = Some(label);
        }
        if let Some(stage) = update.stage {
            self.stage = Some(stage);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(output) = update.output {
            self.output = Some(output);
        }
        self.details.extend(update.details);
        self.updated_at = Utc::now();

        WriteEffect::Merged
    }
}

/// A partial write against a job's snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub state: JobState,
    pub progress_percent: Option<u8>,
    pub label: Option<String>,
    pub stage: Option<String>,
    pub error: Option<JobError>,
    pub output: Option<String>,
    pub details: BTreeMap<String, Value>,
}

impl StatusUpdate {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn pending() -> Self {
        Self::new(JobState::Pending)
    }

    pub fn running() -> Self {
        Self::new(JobState::Running)
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::new(JobState::Success).with_output(output)
    }

    pub fn failure(error: JobError) -> Self {
        let stage = error.stage.clone();
        let mut update = Self::new(JobState::Failure).with_stage(stage);
        update.error = Some(error);
        update
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.progress_percent = Some(percent.min(100));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
