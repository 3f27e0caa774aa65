//! Pipeline coordinator: accepts submissions, chains stages through the work
//! queue and runs the completion or failure handler exactly once per outcome.
//!
//! Stage N+1 is enqueued only after stage N returned successfully; a failure
//! at any stage short-circuits to the failure handler. Each hop is its own
//! queue task, so a job's stages may land on different workers.
//!
//! Redelivered tasks are expected. A `RunStage` for a stage the job already
//! got past is skipped, so the chain never forks.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tracing::{error, info, warn};

use crate::context::PipelineContext;
use crate::error::{CoordinatorError, ErrorKind};
use crate::executor::{StageExecutor, StageOutcome};
use crate::job::{Job, JobId, Submission};
use crate::pipeline::PipelineDefinition;
use crate::queue::{ChainOutcome, PipelineTask, WorkQueue};
use crate::snapshot::{JobError, JobState, StatusUpdate};
use crate::store::SharedStatusStore;
use crate::worker::TaskHandler;

/// Stage name recorded when the completion handler itself fails.
pub const COMPLETION_STAGE: &str = "completion";

pub struct PipelineCoordinator {
    pipelines: HashMap<String, Arc<PipelineDefinition>>,
    executor: StageExecutor,
    store: SharedStatusStore,
    queue: Arc<dyn WorkQueue>,
    /// Per running job, the number of leading stages that have completed.
    progress: DashMap<JobId, usize>,
}

impl PipelineCoordinator {
    pub fn new(store: SharedStatusStore, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            pipelines: HashMap::new(),
            executor: StageExecutor::new(store.clone()),
            store,
            queue,
            progress: DashMap::new(),
        }
    }

    /// Register a pipeline definition under its name.
    pub fn with_pipeline(mut self, definition: PipelineDefinition) -> Self {
        self.pipelines
            .insert(definition.name.clone(), definition.into_shared());
        self
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(name).map(Arc::as_ref)
    }

    pub fn store(&self) -> &SharedStatusStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Create a job, record it as PENDING and enqueue its first stage.
    ///
    /// Returns as soon as the job is queued; the pipeline runs on the workers.
    pub async fn submit(&self, submission: Submission) -> Result<Job, CoordinatorError> {
        let definition = self
            .pipelines
            .get(&submission.pipeline)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownPipeline(submission.pipeline.clone()))?;

        let job = Job::new(&definition, submission.context);

        self.store
            .create(
                job.id,
                StatusUpdate::pending()
                    .with_percent(0)
                    .with_label("queued")
                    .with_detail("pipeline", definition.name.clone())
                    .with_detail("stages", json!(job.stages))
                    .with_detail("submitted_at", job.created_at.to_rfc3339()),
            )
            .await?;

        let first = if definition.is_empty() {
            PipelineTask::Complete {
                job_id: job.id,
                pipeline: definition.name.clone(),
                outcome: ChainOutcome::Succeeded {
                    context: job.context.clone(),
                },
            }
        } else {
            PipelineTask::RunStage {
                job_id: job.id,
                pipeline: definition.name.clone(),
                stage_index: 0,
                context: job.context.clone(),
            }
        };
        self.queue.enqueue(first).await?;

        info!(job_id = %job.id, pipeline = %definition.name, stages = definition.len(), "job submitted");
        Ok(job)
    }

    fn definition(&self, name: &str) -> Result<Arc<PipelineDefinition>> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown pipeline: {name}"))
    }

    async fn is_terminal(&self, job_id: JobId) -> Result<bool> {
        let snapshot = self.store.get(job_id).await.context("failed to read job status")?;
        Ok(snapshot.is_some_and(|s| s.is_terminal()))
    }

    fn stage_done(&self, job_id: JobId, stage_index: usize) -> bool {
        self.progress
            .get(&job_id)
            .is_some_and(|completed| stage_index < *completed)
    }

    /// Record `stage_index` as completed. Returns false when another delivery
    /// already got there first.
    fn advance(&self, job_id: JobId, stage_index: usize) -> bool {
        let mut completed = self.progress.entry(job_id).or_insert(0);
        if stage_index < *completed {
            return false;
        }
        *completed = stage_index + 1;
        true
    }

    async fn run_stage(
        &self,
        job_id: JobId,
        pipeline: &str,
        stage_index: usize,
        context: PipelineContext,
    ) -> Result<()> {
        let definition = self.definition(pipeline)?;
        let descriptor = definition
            .get(stage_index)
            .ok_or_else(|| anyhow!("pipeline {pipeline} has no stage {stage_index}"))?;

        if self.is_terminal(job_id).await? {
            info!(job_id = %job_id, stage = %descriptor.name, "job already finished, skipping stage");
            return Ok(());
        }

        if self.stage_done(job_id, stage_index) {
            info!(job_id = %job_id, stage = %descriptor.name, "stage already completed, skipping duplicate delivery");
            return Ok(());
        }

        let (context, outcome) = self.executor.run(context, job_id, descriptor).await;

        let first_to_finish = match outcome {
            StageOutcome::Success => self.advance(job_id, stage_index),
            StageOutcome::Failure(_) => !self.stage_done(job_id, stage_index),
        };
        if !first_to_finish {
            info!(job_id = %job_id, stage = %descriptor.name, "stage finished by another delivery, not chaining");
            return Ok(());
        }

        let next = match outcome {
            StageOutcome::Success if stage_index + 1 < definition.len() => PipelineTask::RunStage {
                job_id,
                pipeline: pipeline.to_string(),
                stage_index: stage_index + 1,
                context,
            },
            StageOutcome::Success => PipelineTask::Complete {
                job_id,
                pipeline: pipeline.to_string(),
                outcome: ChainOutcome::Succeeded { context },
            },
            StageOutcome::Failure(error) => PipelineTask::Complete {
                job_id,
                pipeline: pipeline.to_string(),
                outcome: ChainOutcome::Failed { error },
            },
        };

        self.queue
            .enqueue(next)
            .await
            .context("failed to enqueue next pipeline task")?;
        Ok(())
    }

    /// Completion handler: normalize the final context into the SUCCESS snapshot.
    async fn complete_success(&self, job_id: JobId, pipeline: &str, context: PipelineContext) -> Result<()> {
        let definition = self.definition(pipeline)?;

        let result = match context.get_str(&definition.output_field) {
            Some(output) => {
                let update = StatusUpdate::success(output)
                    .with_percent(100)
                    .with_label("pipeline completed")
                    .with_detail("pipeline", definition.name.clone())
                    .with_detail("completed_at", Utc::now().to_rfc3339());
                self.store
                    .write(job_id, update)
                    .await
                    .map_err(|e| format!("failed to record success: {e}"))
            }
            None => Err(format!(
                "output field `{}` missing from final context",
                definition.output_field
            )),
        };

        self.progress.remove(&job_id);
        match result {
            Ok(snapshot) if snapshot.state == JobState::Success => {
                info!(job_id = %job_id, pipeline, "job succeeded");
                Ok(())
            }
            Ok(snapshot) => {
                warn!(job_id = %job_id, state = snapshot.state.as_str(), "job already finished, success not recorded");
                Ok(())
            }
            Err(message) => {
                error!(job_id = %job_id, error = %message, "completion handler failed");
                let error = JobError::new(ErrorKind::CallbackError, message, COMPLETION_STAGE);
                self.record_failure(job_id, error).await
            }
        }
    }

    /// Failure handler: record the error against the stage that raised it.
    async fn complete_failure(&self, job_id: JobId, error: JobError) -> Result<()> {
        warn!(job_id = %job_id, stage = %error.stage, kind = %error.kind, error = %error.message, "job failed");
        self.record_failure(job_id, error).await
    }

    async fn record_failure(&self, job_id: JobId, error: JobError) -> Result<()> {
        self.progress.remove(&job_id);
        let update = StatusUpdate::failure(error.clone())
            .with_label(error.summary())
            .with_detail("failed_at", Utc::now().to_rfc3339());
        self.store
            .write(job_id, update)
            .await
            .context("failed to record job failure")?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for PipelineCoordinator {
    async fn handle(&self, task: PipelineTask) -> Result<()> {
        match task {
            PipelineTask::RunStage {
                job_id,
                pipeline,
                stage_index,
                context,
            } => self.run_stage(job_id, &pipeline, stage_index, context).await,
            PipelineTask::Complete {
                job_id,
                pipeline,
                outcome: ChainOutcome::Succeeded { context },
            } => self.complete_success(job_id, &pipeline, context).await,
            PipelineTask::Complete {
                job_id,
                outcome: ChainOutcome::Failed { error },
                ..
            } => self.complete_failure(job_id, error).await,
        }
    }

    /// A dropped task fails its job, so the job never stays RUNNING.
    async fn on_dead_letter(&self, task: &PipelineTask, reason: &str) -> Result<()> {
        let job_id = task.job_id();
        if self.is_terminal(job_id).await? {
            return Ok(());
        }

        let error = match task {
            PipelineTask::RunStage {
                pipeline, stage_index, ..
            } => {
                let stage = self
                    .pipeline(pipeline)
                    .and_then(|definition| definition.get(*stage_index))
                    .map(|descriptor| descriptor.name.clone())
                    .unwrap_or_else(|| format!("stage {stage_index}"));
                JobError::new(
                    ErrorKind::MaxRetriesExceeded,
                    format!("task gave up after repeated delivery failures: {reason}"),
                    stage,
                )
            }
            PipelineTask::Complete { .. } => JobError::new(
                ErrorKind::CallbackError,
                format!("completion handler gave up after repeated delivery failures: {reason}"),
                COMPLETION_STAGE,
            ),
        };

        error!(job_id = %job_id, stage = %error.stage, kind = %error.kind, "task dead-lettered, failing job");
        self.record_failure(job_id, error).await
    }
}
