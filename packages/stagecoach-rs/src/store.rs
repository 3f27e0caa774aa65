//! Root status store: one snapshot per job, written by many concurrent writers.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::StoreError;
use crate::job::JobId;
use crate::snapshot::{StatusSnapshot, StatusUpdate, WriteEffect};

/// Keyed snapshot storage.
///
/// Implementations must apply [`StatusSnapshot::apply`] atomically per key:
/// concurrent writers to the same job never lose each other's fields.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Store a fresh snapshot for `job_id`, discarding anything already there.
    async fn create(&self, job_id: JobId, update: StatusUpdate) -> Result<StatusSnapshot, StoreError>;

    /// Merge `update` into the job's snapshot. Unknown jobs start from an
    /// empty PENDING snapshot.
    async fn write(&self, job_id: JobId, update: StatusUpdate) -> Result<StatusSnapshot, StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<StatusSnapshot>, StoreError>;
}

pub type SharedStatusStore = Arc<dyn StatusStore>;

/// Process-local store backed by a sharded concurrent map.
///
/// The shard lock held by a `DashMap` entry is the per-key critical section.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    snapshots: DashMap<JobId, StatusSnapshot>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn create(&self, job_id: JobId, update: StatusUpdate) -> Result<StatusSnapshot, StoreError> {
        let snapshot = StatusSnapshot::from_update(job_id, update);
        self.snapshots.insert(job_id, snapshot.clone());
        Ok(snapshot)
    }

    async fn write(&self, job_id: JobId, update: StatusUpdate) -> Result<StatusSnapshot, StoreError> {
        let mut entry = self
            .snapshots
            .entry(job_id)
            .or_insert_with(|| StatusSnapshot::new(job_id));

        let requested = update.state;
        if entry.apply(update) == WriteEffect::Ignored {
            debug!(
                job_id = %job_id,
                current = entry.state.as_str(),
                requested = requested.as_str(),
                "dropping write to terminal snapshot"
            );
        }

        Ok(entry.clone())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<StatusSnapshot>, StoreError> {
        Ok(self.snapshots.get(&job_id).map(|s| s.clone()))
    }
}
