//! Stage executor: runs one stage against a context with retry, timeout and
//! failure classification.
//!
//! ```text
//! run(context, job, descriptor)
//!   ├─ write RUNNING "<stage> starting" (0%)
//!   ├─ attempt loop
//!   │    ├─ stage.run() under tokio::time::timeout
//!   │    ├─ transient + budget left → sleep(backoff) → retry
//!   │    └─ otherwise → classify and stop
//!   ├─ success → merge output, write "<stage> completed" (100%)
//!   └─ failure → write FAILURE snapshot, then return
//! ```

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::error::{ErrorKind, StageError};
use crate::job::JobId;
use crate::progress::ProgressReporter;
use crate::snapshot::{JobError, StatusUpdate};
use crate::stage::{StageDescriptor, StageInput};
use crate::store::SharedStatusStore;

/// Result of one stage execution. The context is returned alongside.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success,
    Failure(JobError),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

#[derive(Clone)]
pub struct StageExecutor {
    store: SharedStatusStore,
}

impl StageExecutor {
    pub fn new(store: SharedStatusStore) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        context: PipelineContext,
        job_id: JobId,
        descriptor: &StageDescriptor,
    ) -> (PipelineContext, StageOutcome) {
        let stage = descriptor.name.as_str();
        let progress = ProgressReporter::new(self.store.clone(), job_id, stage);

        info!(job_id = %job_id, stage, "stage starting");
        progress.report(0, format!("{stage} starting")).await;

        let result = self.attempt_until_done(&context, job_id, descriptor, &progress).await;

        match result {
            Ok(output) => {
                let (context, rejected) = context.merge_output(output, &descriptor.produces);
                if !rejected.is_empty() {
                    warn!(job_id = %job_id, stage, fields = ?rejected, "dropped overwrites of unowned fields");
                }
                progress.report(100, format!("{stage} completed")).await;
                info!(job_id = %job_id, stage, "stage completed");
                (context, StageOutcome::Success)
            }
            Err(error) => {
                self.record_failure(job_id, &error).await;
                (context, StageOutcome::Failure(error))
            }
        }
    }

    async fn attempt_until_done(
        &self,
        context: &PipelineContext,
        job_id: JobId,
        descriptor: &StageDescriptor,
        progress: &ProgressReporter,
    ) -> Result<crate::stage::StageOutput, JobError> {
        let stage = descriptor.name.as_str();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let input = StageInput {
                job_id,
                stage,
                attempt,
                attempt_id: Uuid::new_v4(),
                context,
                progress,
            };

            let result = match tokio::time::timeout(descriptor.timeout, descriptor.stage.run(input)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::transient(format!(
                    "attempt timed out after {:?}",
                    descriptor.timeout
                ))),
            };

            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(job_id = %job_id, stage, attempt, kind = %err.kind(), error = %err, "stage failed");
                return Err(JobError::new(err.kind(), err.to_string(), stage));
            }

            if attempt > descriptor.max_retries {
                warn!(job_id = %job_id, stage, attempt, error = %err, "stage retries exhausted");
                return Err(JobError::new(
                    ErrorKind::MaxRetriesExceeded,
                    format!("gave up after {attempt} attempts: {err}"),
                    stage,
                ));
            }

            let delay = descriptor.backoff.delay(attempt);
            debug!(job_id = %job_id, stage, attempt, ?delay, error = %err, "transient failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn record_failure(&self, job_id: JobId, error: &JobError) {
        let update = StatusUpdate::failure(error.clone()).with_label(error.summary());
        if let Err(e) = self.store.write(job_id, update).await {
            warn!(job_id = %job_id, stage = %error.stage, error = %e, "failed to record stage failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::JobState;
    use crate::stage::{Backoff, StageOutput};
    use crate::store::{InMemoryStatusStore, StatusStore};
    use crate::testing::ScriptedStage;
    use std::sync::Arc;
    use std::time::Duration;

    fn descriptor(name: &str, stage: Arc<ScriptedStage>) -> StageDescriptor {
        StageDescriptor::builder()
            .name(name)
            .max_retries(1)
            .backoff(Backoff::Fixed(Duration::from_millis(1)))
            .timeout(Duration::from_secs(5))
            .produces(vec!["text".to_string()])
            .stage(stage)
            .build()
    }

    fn setup() -> (Arc<InMemoryStatusStore>, StageExecutor) {
        let store = Arc::new(InMemoryStatusStore::new());
        let executor = StageExecutor::new(store.clone());
        (store, executor)
    }

    #[tokio::test]
    async fn success_merges_output_and_reports_completion() {
        let (store, executor) = setup();
        let stage = Arc::new(ScriptedStage::succeeding(StageOutput::new().with_field("text", "body")));
        let id = JobId::new();

        let (ctx, outcome) = executor
            .run(PipelineContext::new().with_field("raw_html", "<p>body</p>"), id, &descriptor("extract_text", stage.clone()))
            .await;

        assert_eq!(outcome, StageOutcome::Success);
        assert_eq!(ctx.get_str("text"), Some("body"));
        assert_eq!(ctx.get_str("raw_html"), Some("<p>body</p>"));

        let snapshot = store.get(id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Running);
        assert_eq!(snapshot.progress_percent, Some(100));
        assert_eq!(snapshot.label.as_deref(), Some("extract_text completed"));
        assert_eq!(stage.invocations(), 1);
    }

    #[tokio::test]
    async fn transient_failures_stop_after_budget() {
        let (store, executor) = setup();
        let stage = Arc::new(ScriptedStage::failing(StageError::transient("connection reset")));
        let id = JobId::new();

        let (_, outcome) = executor
            .run(PipelineContext::new(), id, &descriptor("fetch_document", stage.clone()))
            .await;

        assert_eq!(stage.invocations(), 2);
        let StageOutcome::Failure(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::MaxRetriesExceeded);
        assert_eq!(error.stage, "fetch_document");

        let snapshot = store.get(id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Failure);
        assert_eq!(snapshot.error, Some(error));
    }

    #[tokio::test]
    async fn transient_failure_then_success_recovers() {
        let (_, executor) = setup();
        let stage = Arc::new(
            ScriptedStage::failing(StageError::transient("503"))
                .then_ok(StageOutput::new().with_field("text", "ok")),
        );

        let (ctx, outcome) = executor
            .run(PipelineContext::new(), JobId::new(), &descriptor("extract_text", stage.clone()))
            .await;

        assert!(outcome.is_success());
        assert_eq!(ctx.get_str("text"), Some("ok"));
        assert_eq!(stage.invocations(), 2);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let (_, executor) = setup();
        let stage = Arc::new(ScriptedStage::failing(StageError::fatal("bad content")));

        let (_, outcome) = executor
            .run(PipelineContext::new(), JobId::new(), &descriptor("filter_content", stage.clone()))
            .await;

        assert_eq!(stage.invocations(), 1);
        assert_eq!(
            outcome,
            StageOutcome::Failure(JobError::new(ErrorKind::FatalExternalError, "bad content", "filter_content"))
        );
    }

    #[tokio::test]
    async fn fatal_error_ends_retries_with_budget_left() {
        let (store, executor) = setup();
        let stage = Arc::new(
            ScriptedStage::failing(StageError::transient("503"))
                .then_err(StageError::fatal("posting removed"))
                .then_ok(StageOutput::new().with_field("text", "too late")),
        );
        let descriptor = StageDescriptor::builder()
            .name("fetch_document")
            .max_retries(3)
            .backoff(Backoff::Fixed(Duration::from_millis(1)))
            .stage(stage.clone())
            .build();
        let id = JobId::new();

        let (_, outcome) = executor.run(PipelineContext::new(), id, &descriptor).await;

        assert_eq!(stage.invocations(), 2);
        assert_eq!(
            outcome,
            StageOutcome::Failure(JobError::new(ErrorKind::FatalExternalError, "posting removed", "fetch_document"))
        );
        let snapshot = store.get(id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Failure);
    }

    #[tokio::test]
    async fn missing_field_is_not_retried() {
        let (_, executor) = setup();
        let stage = Arc::new(ScriptedStage::failing(StageError::missing("raw_html")));

        let (_, outcome) = executor
            .run(PipelineContext::new(), JobId::new(), &descriptor("extract_text", stage.clone()))
            .await;

        assert_eq!(stage.invocations(), 1);
        let StageOutcome::Failure(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::MissingField);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_transient() {
        let (_, executor) = setup();
        let stage = Arc::new(
            ScriptedStage::succeeding(StageOutput::new()).with_delay(Duration::from_secs(60)),
        );
        let descriptor = StageDescriptor::builder()
            .name("generate_letter")
            .max_retries(1)
            .backoff(Backoff::Fixed(Duration::from_secs(1)))
            .timeout(Duration::from_secs(2))
            .stage(stage.clone())
            .build();

        let (_, outcome) = executor.run(PipelineContext::new(), JobId::new(), &descriptor).await;

        assert_eq!(stage.invocations(), 2);
        let StageOutcome::Failure(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::MaxRetriesExceeded);
    }

    #[tokio::test]
    async fn progress_stays_monotonic_across_retries() {
        let store = Arc::new(crate::testing::RecordingStatusStore::new());
        let executor = StageExecutor::new(store.clone());
        let stage = Arc::new(
            ScriptedStage::failing(StageError::transient("flaky"))
                .then_ok(StageOutput::new())
                .with_progress(vec![(20, "one"), (70, "two")]),
        );
        let id = JobId::new();

        executor
            .run(PipelineContext::new(), id, &descriptor("extract_text", stage))
            .await;

        let percents: Vec<u8> = store
            .updates(id)
            .into_iter()
            .filter_map(|u| u.progress_percent)
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
    }
}
