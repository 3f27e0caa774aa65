//! Stage abstraction: the external unit of pipeline work and its run policy.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::error::StageError;
use crate::job::JobId;
use crate::progress::ProgressReporter;

/// Everything one stage attempt gets to see.
pub struct StageInput<'a> {
    pub job_id: JobId,
    pub stage: &'a str,
    /// 1-based attempt number within this stage execution.
    pub attempt: u32,
    /// Unique per attempt. Use it to suffix anything written outside the
    /// context so concurrent attempts never collide.
    pub attempt_id: Uuid,
    pub context: &'a PipelineContext,
    pub progress: &'a ProgressReporter,
}

/// Fields a stage contributes to the context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    fields: BTreeMap<String, Value>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

/// A unit of pipeline work.
///
/// Stages must be idempotent with respect to the context: the work queue
/// delivers at least once, so the same stage may run more than once for a job.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError>;
}

/// Delay before retry number `n` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// A named stage plus its retry, timeout and ownership policy.
#[derive(Clone, TypedBuilder)]
pub struct StageDescriptor {
    #[builder(setter(into))]
    pub name: String,

    /// Retries after the first attempt. Only transient failures are retried.
    #[builder(default = 1)]
    pub max_retries: u32,

    #[builder(default = Backoff::Fixed(Duration::from_secs(5)))]
    pub backoff: Backoff,

    /// Wall-clock limit for a single attempt. Exceeding it counts as transient.
    #[builder(default = Duration::from_secs(300))]
    pub timeout: Duration,

    /// Context fields this stage may overwrite.
    #[builder(default)]
    pub produces: Vec<String>,

    pub stage: Arc<dyn Stage>,
}

impl StageDescriptor {
    pub fn owns(&self, field: &str) -> bool {
        self.produces.iter().any(|f| f == field)
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .field("produces", &self.produces)
            .finish_non_exhaustive()
    }
}
