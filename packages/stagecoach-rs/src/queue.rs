//! Work queue: durable-style task hand-off between the coordinator and workers.
//!
//! Delivery is at-least-once. A claimed task is leased to one worker; the
//! lease is extended by heartbeats and the task is acknowledged only after the
//! handler finishes. If the lease lapses (the worker died or hung) the task
//! becomes claimable again.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::error::QueueError;
use crate::job::JobId;
use crate::snapshot::JobError;

pub type TaskId = Uuid;

/// Unit of work carried by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineTask {
    /// Run stage `stage_index` of `pipeline` against `context`.
    RunStage {
        job_id: JobId,
        pipeline: String,
        stage_index: usize,
        context: PipelineContext,
    },
    /// Run the completion or failure handler for a finished chain.
    Complete {
        job_id: JobId,
        pipeline: String,
        outcome: ChainOutcome,
    },
}

impl PipelineTask {
    pub fn job_id(&self) -> JobId {
        match self {
            PipelineTask::RunStage { job_id, .. } | PipelineTask::Complete { job_id, .. } => *job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineTask::RunStage { .. } => "run_stage",
            PipelineTask::Complete { .. } => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChainOutcome {
    Succeeded { context: PipelineContext },
    Failed { error: JobError },
}

/// A task leased to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub task: PipelineTask,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery: u32,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, task: PipelineTask) -> Result<TaskId, QueueError>;

    /// Lease the next ready task to `worker_id`, if any.
    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedTask>, QueueError>;

    /// Extend the lease on a claimed task.
    async fn heartbeat(&self, task_id: TaskId) -> Result<(), QueueError>;

    /// Remove a task `worker_id` finished. A worker whose lease lapsed and
    /// was re-claimed by another worker must not remove the live lease.
    async fn ack(&self, task_id: TaskId, worker_id: &str) -> Result<(), QueueError>;

    /// Give a task claimed by `worker_id` back for redelivery.
    async fn release(&self, task_id: TaskId, worker_id: &str) -> Result<(), QueueError>;

    /// Tasks waiting to be claimed.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Wait until a task may be available, or `timeout` elapses.
    async fn wait_for_task(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claim stays valid without a heartbeat.
    pub lease_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
        }
    }
}

struct Entry {
    task: PipelineTask,
    delivery: u32,
}

struct Lease {
    entry: Entry,
    worker_id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(TaskId, Entry)>,
    leased: HashMap<TaskId, Lease>,
}

impl QueueState {
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<TaskId> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                warn!(
                    task_id = %id,
                    worker_id = %lease.worker_id,
                    job_id = %lease.entry.task.job_id(),
                    "lease expired, task will be redelivered"
                );
                self.ready.push_back((id, lease.entry));
            }
        }
    }
}

/// Process-local queue.
pub struct InMemoryWorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    config: QueueConfig,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            config,
        }
    }

    /// Tasks currently leased to workers.
    pub fn in_flight(&self) -> usize {
        self.lock().leased.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, task: PipelineTask) -> Result<TaskId, QueueError> {
        let id = Uuid::new_v4();
        debug!(task_id = %id, job_id = %task.job_id(), kind = task.kind(), "task enqueued");
        self.lock().ready.push_back((id, Entry { task, delivery: 0 }));
        self.notify.notify_one();
        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedTask>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        state.reclaim_expired(now);

        let Some((id, mut entry)) = state.ready.pop_front() else {
            return Ok(None);
        };
        entry.delivery += 1;

        let claimed = ClaimedTask {
            id,
            task: entry.task.clone(),
            delivery: entry.delivery,
        };
        state.leased.insert(
            id,
            Lease {
                entry,
                worker_id: worker_id.to_string(),
                expires_at: now + self.config.lease_duration,
            },
        );

        Ok(Some(claimed))
    }

    async fn heartbeat(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut state = self.lock();
        let lease = state
            .leased
            .get_mut(&task_id)
            .ok_or(QueueError::UnknownTask(task_id))?;
        lease.expires_at = Instant::now() + self.config.lease_duration;
        Ok(())
    }

    async fn ack(&self, task_id: TaskId, worker_id: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        if let Some(lease) = state.leased.get(&task_id) {
            if lease.worker_id != worker_id {
                debug!(
                    task_id = %task_id,
                    worker_id,
                    owner = %lease.worker_id,
                    "stale ack, task is leased to another worker"
                );
                return Ok(());
            }
            state.leased.remove(&task_id);
            return Ok(());
        }
        // Lease lapsed and the task went back to ready; the work is done.
        let before = state.ready.len();
        state.ready.retain(|(id, _)| *id != task_id);
        if state.ready.len() < before {
            return Ok(());
        }
        Err(QueueError::UnknownTask(task_id))
    }

    async fn release(&self, task_id: TaskId, worker_id: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        match state.leased.get(&task_id) {
            Some(lease) if lease.worker_id == worker_id => {}
            Some(_) => return Ok(()),
            None => return Err(QueueError::UnknownTask(task_id)),
        }
        let Some(lease) = state.leased.remove(&task_id) else {
            return Err(QueueError::UnknownTask(task_id));
        };
        state.ready.push_back((task_id, lease.entry));
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.lock().ready.len())
    }

    async fn wait_for_task(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_stage(job_id: JobId) -> PipelineTask {
        PipelineTask::RunStage {
            job_id,
            pipeline: "cover_letter".to_string(),
            stage_index: 0,
            context: PipelineContext::new(),
        }
    }

    #[tokio::test]
    async fn claims_in_fifo_order() {
        let queue = InMemoryWorkQueue::new();
        let first = JobId::new();
        let second = JobId::new();
        queue.enqueue(run_stage(first)).await.unwrap();
        queue.enqueue(run_stage(second)).await.unwrap();

        let a = queue.claim("w1").await.unwrap().unwrap();
        let b = queue.claim("w2").await.unwrap().unwrap();

        assert_eq!(a.task.job_id(), first);
        assert_eq!(b.task.job_id(), second);
        assert!(queue.claim("w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_claimed_task_is_not_handed_out_twice() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(run_stage(JobId::new())).await.unwrap();

        let claimed = queue.claim("w1").await.unwrap();
        assert!(claimed.is_some());
        assert!(queue.claim("w2").await.unwrap().is_none());
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(queue.in_flight(), 1);
    }

    #[tokio::test]
    async fn ack_removes_task() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(run_stage(JobId::new())).await.unwrap();
        let claimed = queue.claim("w1").await.unwrap().unwrap();

        queue.ack(claimed.id, "w1").await.unwrap();

        assert_eq!(queue.in_flight(), 0);
        assert!(queue.ack(claimed.id, "w1").await.is_err());
    }

    #[tokio::test]
    async fn release_redelivers_with_bumped_counter() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(run_stage(JobId::new())).await.unwrap();

        let first = queue.claim("w1").await.unwrap().unwrap();
        queue.release(first.id, "w1").await.unwrap();
        let second = queue.claim("w2").await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.delivery, 1);
        assert_eq!(second.delivery, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_lease_is_redelivered() {
        let queue = InMemoryWorkQueue::with_config(QueueConfig {
            lease_duration: Duration::from_secs(10),
        });
        queue.enqueue(run_stage(JobId::new())).await.unwrap();
        let first = queue.claim("w1").await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        let second = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.delivery, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_lease_alive() {
        let queue = InMemoryWorkQueue::with_config(QueueConfig {
            lease_duration: Duration::from_secs(10),
        });
        queue.enqueue(run_stage(JobId::new())).await.unwrap();
        let claimed = queue.claim("w1").await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        queue.heartbeat(claimed.id).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(queue.claim("w2").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ack_leaves_new_lease_in_place() {
        let queue = InMemoryWorkQueue::with_config(QueueConfig {
            lease_duration: Duration::from_secs(10),
        });
        queue.enqueue(run_stage(JobId::new())).await.unwrap();
        let first = queue.claim("w1").await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let second = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(second.id, first.id);

        queue.ack(first.id, "w1").await.unwrap();
        queue.release(first.id, "w1").await.unwrap();
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);

        queue.heartbeat(second.id).await.unwrap();
        queue.ack(second.id, "w2").await.unwrap();
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_after_lapse_removes_unclaimed_task() {
        let queue = InMemoryWorkQueue::with_config(QueueConfig {
            lease_duration: Duration::from_secs(10),
        });
        queue.enqueue(run_stage(JobId::new())).await.unwrap();
        let claimed = queue.claim("w1").await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(queue.claim("w2").await.unwrap().map(|c| c.id), Some(claimed.id));
        queue.release(claimed.id, "w2").await.unwrap();

        queue.ack(claimed.id, "w1").await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(queue.claim("w3").await.unwrap().is_none());
    }

    #[test]
    fn tasks_serialize_with_type_tag() {
        let task = PipelineTask::Complete {
            job_id: JobId::new(),
            pipeline: "cover_letter".to_string(),
            outcome: ChainOutcome::Succeeded {
                context: PipelineContext::new().with_field("output", "Dear team"),
            },
        };

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["outcome"]["outcome"], "succeeded");
        assert_eq!(json["outcome"]["context"]["output"], "Dear team");
    }
}
