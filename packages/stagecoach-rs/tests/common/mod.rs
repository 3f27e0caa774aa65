//! Shared harness for pipeline flow tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stagecoach::{
    Backoff, InMemoryStatusStore, InMemoryWorkQueue, JobId, PipelineCoordinator, PipelineDefinition,
    QueueConfig, StageDescriptor, StatusService, StatusServiceConfig, StatusSnapshot, StatusStore,
    WorkerPool, WorkerPoolConfig, WorkerPoolHandle,
};
use stagecoach::testing::ScriptedStage;
use tokio_util::sync::CancellationToken;

pub struct TestPipeline {
    pub store: Arc<InMemoryStatusStore>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub coordinator: Arc<PipelineCoordinator>,
    pub status: StatusService,
    shutdown: CancellationToken,
    pool: Option<WorkerPoolHandle>,
}

impl TestPipeline {
    /// Start `workers` workers over a fresh store and queue.
    pub fn start(pipeline: PipelineDefinition, workers: usize) -> Self {
        Self::start_with_lease(pipeline, workers, Duration::from_secs(30))
    }

    pub fn start_with_lease(pipeline: PipelineDefinition, workers: usize, lease: Duration) -> Self {
        Self::start_with_pool(
            pipeline,
            lease,
            WorkerPoolConfig {
                worker_count: workers,
                poll_interval: Duration::from_millis(10),
                heartbeat_interval: Duration::from_secs(10),
                ..Default::default()
            },
        )
    }

    pub fn start_with_pool(pipeline: PipelineDefinition, lease: Duration, pool_config: WorkerPoolConfig) -> Self {
        let store = Arc::new(InMemoryStatusStore::new());
        let queue = Arc::new(InMemoryWorkQueue::with_config(QueueConfig {
            lease_duration: lease,
        }));
        let coordinator = Arc::new(
            PipelineCoordinator::new(store.clone(), queue.clone()).with_pipeline(pipeline),
        );
        let status = StatusService::with_config(
            store.clone(),
            StatusServiceConfig {
                poll_interval: Duration::from_millis(10),
            },
        );

        let shutdown = CancellationToken::new();
        let pool = WorkerPool::with_config(queue.clone(), coordinator.clone(), pool_config)
            .spawn(shutdown.clone());

        Self {
            store,
            queue,
            coordinator,
            status,
            shutdown,
            pool: Some(pool),
        }
    }

    /// Poll until the job is terminal, or panic after `timeout`.
    pub async fn wait_for_terminal(&self, job_id: JobId, timeout: Duration) -> StatusSnapshot {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.store.get(job_id).await.unwrap() {
                if snapshot.is_terminal() {
                    return snapshot;
                }
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {job_id} did not finish within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }
}

/// A descriptor with millisecond backoff so retries don't slow tests down.
pub fn quick_stage(name: &str, produces: &[&str], stage: Arc<ScriptedStage>) -> StageDescriptor {
    StageDescriptor::builder()
        .name(name)
        .max_retries(1)
        .backoff(Backoff::Fixed(Duration::from_millis(5)))
        .timeout(Duration::from_secs(5))
        .produces(produces.iter().map(|s| s.to_string()).collect())
        .stage(stage)
        .build()
}
