//! Error types for the scheduler core

use std::io;
use std::os::unix::io::RawFd;

/// Errors a task computation can fail with.
///
/// Returned from [`Coroutine::resume`](crate::Coroutine::resume). A task that
/// produces one of these is removed from the scheduler; sibling tasks keep
/// running.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// I/O performed by the task failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A readiness wait the task issued could not be satisfied
    #[error(transparent)]
    Wait(#[from] WaitFault),

    /// Task-defined failure
    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Build a task-defined failure from any displayable message.
    pub fn other(msg: impl Into<String>) -> Self {
        TaskError::Other(msg.into())
    }
}

/// Delivered to a task whose readiness wait failed.
///
/// The wait-set entry for the resource is dropped when this is produced; the
/// task is resumed with the fault instead of hanging forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("resource {fd} is not pollable")]
pub struct WaitFault {
    /// The resource whose readiness wait failed
    pub fd: RawFd,
}

/// Fatal run-loop errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The readiness primitive itself failed wholesale
    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),
}

/// Scheduler result type
pub type SchedulerResult<T> = Result<T, SchedulerError>;
