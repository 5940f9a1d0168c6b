//! Task structure and the resumable-computation contract

use crate::error::{TaskError, WaitFault};
use crate::scheduler::SystemCall;
use std::os::unix::io::RawFd;

/// Unique identifier for a Task
///
/// Strictly increasing per scheduler instance and never reused, even after
/// the task dies. Allocation lives in the scheduler so that independent
/// scheduler instances do not share a counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }

    /// The first id a scheduler hands out.
    pub(crate) fn first() -> Self {
        TaskId(1)
    }

    /// The id handed out after this one.
    pub(crate) fn next(self) -> Self {
        TaskId(self.0 + 1)
    }
}

/// Where a live task currently sits in the scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// In the ready queue, eligible for its next advance
    Ready,
    /// Being advanced right now (or issuing a system call)
    Running,
    /// Suspended until a resource becomes readable
    WaitingRead,
    /// Suspended until a resource becomes writable
    WaitingWrite,
}

/// Value injected into a task on its next resume.
///
/// Exactly one may be pending per task; setting a new one before the old is
/// consumed overwrites it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeValue {
    /// Nothing to deliver (bare scheduling turn)
    None,
    /// A task id (identity and spawn results)
    Task(TaskId),
    /// A boolean (kill results)
    Flag(bool),
    /// The resource whose readiness wait fired
    Ready(RawFd),
    /// The readiness wait failed; the resource will never become ready
    Fault(WaitFault),
}

/// Value produced by one advance of a task's computation.
pub enum Step {
    /// Bare suspension: give up the turn, stay runnable
    Yield,
    /// Trapdoor: ask the scheduler to perform a privileged operation
    Syscall(SystemCall),
    /// The computation ran to completion
    Done,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Yield => f.write_str("Yield"),
            Step::Syscall(call) => f.debug_tuple("Syscall").field(call).finish(),
            Step::Done => f.write_str("Done"),
        }
    }
}

/// One resumable unit of work.
///
/// `resume` accepts exactly one injected value and returns exactly one
/// produced value or a completion signal. Returning `Err` fails the task;
/// the scheduler removes it and keeps running its siblings.
///
/// Implemented for `FnMut(ResumeValue) -> Result<Step, TaskError>` closures,
/// which is usually all a small task needs; larger tasks implement the trait
/// on an explicit state machine.
pub trait Coroutine {
    /// Start or resume the computation with `value`.
    ///
    /// Must not be called again after producing `Ok(Step::Done)` or `Err`.
    fn resume(&mut self, value: ResumeValue) -> Result<Step, TaskError>;
}

impl<F> Coroutine for F
where
    F: FnMut(ResumeValue) -> Result<Step, TaskError>,
{
    fn resume(&mut self, value: ResumeValue) -> Result<Step, TaskError> {
        self(value)
    }
}

/// A schedulable unit: one owned computation plus its pending resume value.
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// The owned resumable computation
    coroutine: Box<dyn Coroutine>,

    /// Value to inject on the next advance; cleared when consumed
    resume_value: Option<ResumeValue>,

    /// Whether the computation has been advanced at least once
    started: bool,

    /// Whether the computation has run to completion (or failed)
    finished: bool,
}

impl Task {
    /// Create a new Task
    pub(crate) fn new(id: TaskId, coroutine: Box<dyn Coroutine>) -> Self {
        Self {
            id,
            coroutine,
            resume_value: None,
            started: false,
            finished: false,
        }
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Store the value to deliver on the next advance.
    ///
    /// Overwrites any value already pending; values are not queued.
    pub fn set_resume_value(&mut self, value: ResumeValue) {
        self.resume_value = Some(value);
    }

    /// True once the computation has run to completion.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Start or resume the computation and return its next produced value.
    ///
    /// The first advance starts the computation and ignores any pending
    /// resume value; later advances inject the pending value (or
    /// [`ResumeValue::None`] when nothing is pending). Advancing a finished
    /// task is a programming error.
    pub fn advance(&mut self) -> Result<Step, TaskError> {
        debug_assert!(!self.finished, "advance() called on finished task {:?}", self.id);

        let value = if self.started {
            self.resume_value.take().unwrap_or(ResumeValue::None)
        } else {
            self.started = true;
            self.resume_value = None;
            ResumeValue::None
        };

        let step = self.coroutine.resume(value);
        if matches!(step, Ok(Step::Done) | Err(_)) {
            self.finished = true;
        }
        step
    }
}
