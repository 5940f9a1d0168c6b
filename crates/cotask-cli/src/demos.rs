//! Console demo tasks: interleaved counters and the parent/child lifecycle

use cotask_core::{Coroutine, ResumeValue, Step, SystemCall, TaskError, TaskId};

/// A task that learns its own id, then prints one iteration per scheduling
/// turn until `max` iterations are done.
pub fn counter(max: u32) -> impl Coroutine {
    let mut tid: Option<TaskId> = None;
    let mut i = 0;
    move |value: ResumeValue| {
        let id = match tid {
            Some(id) => id,
            None => match value {
                ResumeValue::Task(id) => {
                    tid = Some(id);
                    id
                }
                _ => return Ok(Step::Syscall(SystemCall::Identity)),
            },
        };
        i += 1;
        if i > max {
            return Ok(Step::Done);
        }
        println!("This is task {} iteration {}.", id.as_u64(), i);
        Ok(Step::Yield)
    }
}

fn child_task() -> impl Coroutine {
    let mut tid: Option<TaskId> = None;
    move |value: ResumeValue| {
        let id = match tid {
            Some(id) => id,
            None => match value {
                ResumeValue::Task(id) => {
                    tid = Some(id);
                    id
                }
                _ => return Ok(Step::Syscall(SystemCall::Identity)),
            },
        };
        println!("Child task {} still alive!", id.as_u64());
        Ok(Step::Yield)
    }
}

/// Parent task that spawns a perpetual child and kills it after its own
/// third iteration, demonstrating the full spawn/kill lifecycle.
pub struct ParentTask {
    tid: Option<TaskId>,
    child: Option<TaskId>,
    iteration: u32,
    kill_issued: bool,
}

impl ParentTask {
    pub fn new() -> Self {
        ParentTask {
            tid: None,
            child: None,
            iteration: 0,
            kill_issued: false,
        }
    }
}

impl Coroutine for ParentTask {
    fn resume(&mut self, value: ResumeValue) -> Result<Step, TaskError> {
        let tid = match self.tid {
            Some(id) => id,
            None => match value {
                ResumeValue::Task(id) => {
                    self.tid = Some(id);
                    return Ok(Step::Syscall(SystemCall::Spawn(Box::new(child_task()))));
                }
                _ => return Ok(Step::Syscall(SystemCall::Identity)),
            },
        };

        let child = match self.child {
            Some(id) => id,
            None => match value {
                ResumeValue::Task(id) => {
                    self.child = Some(id);
                    id
                }
                _ => return Err(TaskError::other("expected the spawned child id")),
            },
        };

        if let ResumeValue::Flag(killed) = value {
            log::debug!("kill request for child {:?} returned {}", child, killed);
        }
        if self.iteration == 3 && !self.kill_issued {
            self.kill_issued = true;
            return Ok(Step::Syscall(SystemCall::Kill(child)));
        }
        self.iteration += 1;
        if self.iteration > 6 {
            return Ok(Step::Done);
        }
        println!("Parent task {} iteration {}.", tid.as_u64(), self.iteration);
        Ok(Step::Yield)
    }
}
