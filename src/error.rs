//! Error types surfaced by the engine.

use std::fmt;

use thiserror::Error;

use crate::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Identity of a map or reduce task, attached to task failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskId {
    /// A map task and the split it was reading.
    Map { index: usize, split: String },
    /// A reduce task and its partition.
    Reduce { partition: u32 },
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Map { index, split } => write!(f, "map task {index} ({split})"),
            TaskId::Reduce { partition } => write!(f, "reduce task {partition}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Bad command-line or workload arguments. No job was started.
    #[error("usage: {0}")]
    Usage(String),

    /// The storage backend failed in a way that may go away on retry.
    #[error("storage unavailable: {source}")]
    StorageUnavailable {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("`{0}` not found")]
    NotFound(String),

    /// A user function (or decoding inside a task) failed.
    #[error("{task} failed: {source:#}")]
    TaskExecution {
        task: TaskId,
        #[source]
        source: anyhow::Error,
    },

    /// The output destination is not writable. Raised before any task runs.
    #[error("cannot write output `{path}`: {reason}")]
    PartialWrite { path: String, reason: String },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("job `{0}` was cancelled")]
    Cancelled(String),
}

impl Error {
    /// Whether re-running the whole job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageUnavailable { .. })
    }

    pub(crate) fn task(task: TaskId, source: impl Into<anyhow::Error>) -> Self {
        Error::TaskExecution {
            task,
            source: source.into(),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => Error::NotFound(name),
            other => Error::StorageUnavailable {
                name: other.name().to_string(),
                source: other,
            },
        }
    }
}
