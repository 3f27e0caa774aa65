//! Error types for stagecoach.
//!
//! [`ErrorKind`] is the externally visible failure taxonomy: it is written into
//! every FAILURE snapshot as a stable string. The other enums are the typed
//! errors returned at each seam (stage, store, queue, service, coordinator).
//! Handlers and the worker loop work in `anyhow` and convert at the edges.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;

/// Stable failure classification recorded in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A stage required a context field that was absent. Never retried.
    MissingField,
    /// Network, timeout or contention failure. Retried within the stage budget.
    TransientExternalError,
    /// The stage explicitly rejected its input. Never retried.
    FatalExternalError,
    /// Transient failures exhausted the stage's retry budget.
    MaxRetriesExceeded,
    /// The completion or failure handler itself failed.
    CallbackError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingField => "MissingField",
            ErrorKind::TransientExternalError => "TransientExternalError",
            ErrorKind::FatalExternalError => "FatalExternalError",
            ErrorKind::MaxRetriesExceeded => "MaxRetriesExceeded",
            ErrorKind::CallbackError => "CallbackError",
        }
    }

    /// Whether a failure of this kind should be retried by the executor.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientExternalError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure signalled by an external stage function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("missing context field `{0}`")]
    MissingField(String),

    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl StageError {
    pub fn missing(field: impl Into<String>) -> Self {
        StageError::MissingField(field.into())
    }

    pub fn transient(message: impl fmt::Display) -> Self {
        StageError::Transient(message.to_string())
    }

    pub fn fatal(message: impl fmt::Display) -> Self {
        StageError::Fatal(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::MissingField(_) => ErrorKind::MissingField,
            StageError::Transient(_) => ErrorKind::TransientExternalError,
            StageError::Fatal(_) => ErrorKind::FatalExternalError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Status store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("status store backend error: {0}")]
    Backend(String),
}

/// Work queue failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task {0} is not leased")]
    UnknownTask(uuid::Uuid),

    #[error("work queue backend error: {0}")]
    Backend(String),
}

/// Status query failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Submission failures.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
