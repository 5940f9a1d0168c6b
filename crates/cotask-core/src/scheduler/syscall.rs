//! System calls - the trapdoor between a task and the scheduler
//!
//! A task yields a [`SystemCall`] instead of a plain value when it needs the
//! scheduler to act on its behalf. The run loop applies the call exactly
//! once, synchronously; the call alone decides the issuing task's fate
//! (reschedule now, park in a wait set, or die).

use crate::scheduler::{Coroutine, ResumeValue, Scheduler, TaskId};
use std::fmt;
use std::os::unix::io::RawFd;

/// A deferred, privileged operation yielded by a task.
pub enum SystemCall {
    /// Resume the issuer with its own task id
    Identity,
    /// Register a new task for the computation and resume the issuer with
    /// the new task's id
    Spawn(Box<dyn Coroutine>),
    /// Remove the target task; resume the issuer with `true` on success,
    /// `false` if the id is unknown
    Kill(TaskId),
    /// Suspend the issuer until the resource is readable
    WaitRead(RawFd),
    /// Suspend the issuer until the resource is writable
    WaitWrite(RawFd),
}

impl fmt::Debug for SystemCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemCall::Identity => f.write_str("Identity"),
            SystemCall::Spawn(_) => f.write_str("Spawn(..)"),
            SystemCall::Kill(id) => f.debug_tuple("Kill").field(id).finish(),
            SystemCall::WaitRead(fd) => f.debug_tuple("WaitRead").field(fd).finish(),
            SystemCall::WaitWrite(fd) => f.debug_tuple("WaitWrite").field(fd).finish(),
        }
    }
}

impl SystemCall {
    /// Apply the call on behalf of `issuer`. Consumed exactly once by the
    /// run loop; runs to completion without suspending.
    pub(crate) fn apply(self, issuer: TaskId, sched: &mut Scheduler) {
        match self {
            SystemCall::Identity => {
                sched.set_resume_value(issuer, ResumeValue::Task(issuer));
                sched.schedule(issuer);
            }
            SystemCall::Spawn(coroutine) => {
                let child = sched.spawn_boxed(coroutine);
                sched.set_resume_value(issuer, ResumeValue::Task(child));
                sched.schedule(issuer);
            }
            SystemCall::Kill(target) => {
                let killed = sched.kill(target);
                if target == issuer {
                    // the issuer just removed itself; there is nothing left
                    // to resume
                    return;
                }
                sched.set_resume_value(issuer, ResumeValue::Flag(killed));
                sched.schedule(issuer);
            }
            SystemCall::WaitRead(fd) => {
                // no reschedule: the poller wakes the issuer when fd is ready
                sched.wait_for_read(fd, issuer);
            }
            SystemCall::WaitWrite(fd) => {
                sched.wait_for_write(fd, issuer);
            }
        }
    }
}
