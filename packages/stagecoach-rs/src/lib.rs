//! Stagecoach: staged job orchestration.
//!
//! A job runs an ordered chain of stages. Each stage reads the accumulated
//! [`PipelineContext`], contributes new fields and reports progress into a
//! single per-job [`StatusSnapshot`]. Stages hop between workers through an
//! at-least-once [`WorkQueue`]; the [`PipelineCoordinator`] chains them and
//! runs the completion or failure handler once the chain resolves.
//!
//! ```text
//! submit ─► PENDING ─► [stage 1] ─► [stage 2] ─► … ─► completion ─► SUCCESS
//!                          │            │
//!                          └────────────┴──────────► failure ────► FAILURE
//! ```
//!
//! Clients observe jobs through the read-only [`StatusService`].

pub mod context;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod service;
pub mod snapshot;
pub mod stage;
pub mod store;
pub mod testing;
pub mod worker;

pub use context::PipelineContext;
pub use coordinator::{PipelineCoordinator, COMPLETION_STAGE};
pub use error::{CoordinatorError, ErrorKind, QueueError, ServiceError, StageError, StoreError};
pub use executor::{StageExecutor, StageOutcome};
pub use job::{Job, JobId, Submission};
pub use pipeline::PipelineDefinition;
pub use progress::ProgressReporter;
pub use queue::{
    ChainOutcome, ClaimedTask, InMemoryWorkQueue, PipelineTask, QueueConfig, TaskId, WorkQueue,
};
pub use service::{StatusEvent, StatusService, StatusServiceConfig};
pub use snapshot::{JobError, JobState, StatusSnapshot, StatusUpdate, WriteEffect};
pub use stage::{Backoff, Stage, StageDescriptor, StageInput, StageOutput};
pub use store::{InMemoryStatusStore, SharedStatusStore, StatusStore};
pub use worker::{TaskHandler, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
