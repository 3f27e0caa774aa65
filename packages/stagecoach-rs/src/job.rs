//! Job model: identifiers, submissions and the per-execution record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::pipeline::PipelineDefinition;
use crate::snapshot::JobState;

/// Opaque job identifier. Also the status store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Parameters for starting one pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Name of a registered pipeline definition.
    pub pipeline: String,
    /// Fields every stage can rely on (e.g. the source identifier).
    pub context: PipelineContext,
}

impl Submission {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            context: PipelineContext::new(),
        }
    }

    /// Add an initial context field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context = self.context.with_field(key, value);
        self
    }
}

/// One end-to-end pipeline execution.
///
/// The coordinator hands this back from `submit`; after that the job's
/// observable state lives in the status store only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub pipeline: String,
    pub created_at: DateTime<Utc>,
    pub state: JobState,
    pub stages: Vec<String>,
    pub context: PipelineContext,
}

impl Job {
    pub fn new(definition: &PipelineDefinition, context: PipelineContext) -> Self {
        Self {
            id: JobId::new(),
            pipeline: definition.name.clone(),
            created_at: Utc::now(),
            state: JobState::Pending,
            stages: definition.stage_names(),
            context,
        }
    }
}
