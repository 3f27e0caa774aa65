//! Worker pool: long-running consumers of the work queue.
//!
//! Each `QueueWorker` claims one task at a time, runs it through the
//! `TaskHandler` while heartbeating the lease, and acknowledges it when the
//! handler returns. Workers are independent; any worker may pick up any stage
//! of any job.
//!
//! ```text
//! WorkerPool
//!     ├─► QueueWorker 1 ─┐
//!     ├─► QueueWorker 2 ─┼─► claim ─► handler.handle(task) ─► ack
//!     └─► QueueWorker N ─┘      │            │
//!                               │            ├─ Err / panic ─► release (redeliver)
//!                               │            ├─ Err on final delivery ─► on_dead_letter ─► ack
//!                               └─ heartbeat ┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::{ClaimedTask, PipelineTask, TaskId, WorkQueue};

/// Something that knows how to execute a queued task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: PipelineTask) -> Result<()>;

    /// Called once when `task` failed on its final delivery and is about to
    /// be dropped.
    async fn on_dead_letter(&self, _task: &PipelineTask, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// How long an idle worker waits before polling again
    pub poll_interval: Duration,
    /// How often to heartbeat a running task's lease
    pub heartbeat_interval: Duration,
    /// Deliveries after which a failing task is dropped instead of released
    pub max_deliveries: u32,
    /// Worker IDs are `{prefix}-{n}`
    pub worker_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(20),
            max_deliveries: 5,
            worker_prefix: format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_worker_count(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn WorkQueue>, handler: Arc<dyn TaskHandler>) -> Self {
        Self::with_config(queue, handler, WorkerPoolConfig::default())
    }

    pub fn with_config(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Start every worker. They run until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> WorkerPoolHandle {
        let count = self.config.worker_count.max(1);
        info!(workers = count, prefix = %self.config.worker_prefix, "worker pool starting");

        let handles = (1..=count)
            .map(|n| {
                let worker = QueueWorker {
                    id: format!("{}-{}", self.config.worker_prefix, n),
                    queue: self.queue.clone(),
                    handler: self.handler.clone(),
                    config: self.config.clone(),
                };
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect();

        WorkerPoolHandle { handles }
    }
}

pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker exited abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

struct QueueWorker {
    id: String,
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerPoolConfig,
}

impl QueueWorker {
    async fn run(self, shutdown: CancellationToken) {
        debug!(worker_id = %self.id, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = match self.queue.claim(&self.id).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.queue.wait_for_task(self.config.poll_interval) => {}
                    }
                    continue;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "failed to claim task");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            self.process(claimed).await;
        }

        debug!(worker_id = %self.id, "worker stopped");
    }

    async fn process(&self, claimed: ClaimedTask) {
        let task_id = claimed.id;
        let job_id = claimed.task.job_id();
        let kind = claimed.task.kind();
        debug!(worker_id = %self.id, task_id = %task_id, job_id = %job_id, kind, delivery = claimed.delivery, "claimed task");

        let final_delivery = claimed.delivery >= self.config.max_deliveries;
        // Kept for the dead letter hook; the handler consumes the original.
        let dead_letter = final_delivery.then(|| claimed.task.clone());
        let result = self.execute_with_heartbeat(task_id, claimed.task).await;

        let failure = match result {
            Ok(Ok(())) => {
                if let Err(e) = self.queue.ack(task_id, &self.id).await {
                    warn!(task_id = %task_id, error = %e, "failed to ack task");
                }
                return;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(join_err) if join_err.is_panic() => "handler panicked".to_string(),
            Err(join_err) => join_err.to_string(),
        };

        if let Some(task) = dead_letter {
            error!(
                task_id = %task_id,
                job_id = %job_id,
                kind,
                delivery = claimed.delivery,
                error = %failure,
                "task failed on final delivery, dropping"
            );
            if let Err(e) = self.handler.on_dead_letter(&task, &failure).await {
                error!(task_id = %task_id, job_id = %job_id, error = %e, "dead letter handler failed");
            }
            if let Err(e) = self.queue.ack(task_id, &self.id).await {
                warn!(task_id = %task_id, error = %e, "failed to ack dropped task");
            }
            return;
        }

        warn!(task_id = %task_id, job_id = %job_id, kind, error = %failure, "task failed, releasing for redelivery");
        if let Err(e) = self.queue.release(task_id, &self.id).await {
            warn!(task_id = %task_id, error = %e, "failed to release task");
        }
    }

    /// Run the handler on its own task so a panic surfaces as a `JoinError`
    /// instead of taking the worker down.
    async fn execute_with_heartbeat(
        &self,
        task_id: TaskId,
        task: PipelineTask,
    ) -> Result<Result<()>, tokio::task::JoinError> {
        let queue = self.queue.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let heartbeat_cancel = CancellationToken::new();

        let heartbeat_token = heartbeat_cancel.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // first tick is immediate

            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(task_id).await {
                            warn!(task_id = %task_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });

        let handler = self.handler.clone();
        let result = tokio::spawn(async move { handler.handle(task).await }).await;

        heartbeat_cancel.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::job::JobId;
    use crate::queue::InMemoryWorkQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn config_defaults() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.worker_count, 4);
        assert!(config.worker_prefix.starts_with("worker-"));
    }

    struct CountingHandler {
        calls: AtomicUsize,
        dead_letters: AtomicUsize,
        fail_first: usize,
    }

    impl CountingHandler {
        fn failing_first(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dead_letters: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _task: PipelineTask) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("boom");
            }
            Ok(())
        }

        async fn on_dead_letter(&self, _task: &PipelineTask, reason: &str) -> Result<()> {
            assert_eq!(reason, "boom");
            self.dead_letters.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task() -> PipelineTask {
        PipelineTask::RunStage {
            job_id: JobId::new(),
            pipeline: "p".to_string(),
            stage_index: 0,
            context: PipelineContext::new(),
        }
    }

    async fn wait_for_calls(handler: &CountingHandler, expected: usize) {
        for _ in 0..200 {
            if handler.calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn failed_task_is_released_and_retried() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let handler = Arc::new(CountingHandler::failing_first(1));
        queue.enqueue(task()).await.unwrap();

        let shutdown = CancellationToken::new();
        let pool = WorkerPool::with_config(
            queue.clone(),
            handler.clone(),
            WorkerPoolConfig {
                worker_count: 1,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .spawn(shutdown.clone());

        wait_for_calls(&handler, 2).await;
        shutdown.cancel();
        pool.join().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(handler.dead_letters.load(Ordering::SeqCst), 0);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn task_is_dropped_after_max_deliveries() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let handler = Arc::new(CountingHandler::failing_first(usize::MAX));
        queue.enqueue(task()).await.unwrap();

        let shutdown = CancellationToken::new();
        let pool = WorkerPool::with_config(
            queue.clone(),
            handler.clone(),
            WorkerPoolConfig {
                worker_count: 1,
                poll_interval: Duration::from_millis(10),
                max_deliveries: 3,
                ..Default::default()
            },
        )
        .spawn(shutdown.clone());

        wait_for_calls(&handler, 3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        pool.join().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.dead_letters.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(queue.in_flight(), 0);
    }
}
