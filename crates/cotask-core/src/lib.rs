//! Single-threaded cooperative task scheduling.
//!
//! Independent units of resumable work are interleaved on one execution
//! context. A task suspends only at explicit yield points; yielding a
//! [`SystemCall`] lets it ask the scheduler for privileged operations
//! (spawn, kill, identity, readiness waits). Blocking I/O coexists with
//! cooperative scheduling through a poller task that multiplexes every
//! pending readiness wait over one [`Reactor`] check.
//!
//! ```no_run
//! use cotask_core::{ResumeValue, Scheduler, Step, SystemCall};
//!
//! let mut scheduler = Scheduler::new();
//! let mut asked = false;
//! scheduler.spawn(move |value: ResumeValue| {
//!     if !asked {
//!         asked = true;
//!         return Ok(Step::Syscall(SystemCall::Identity));
//!     }
//!     println!("running as {:?}", value);
//!     Ok(Step::Done)
//! });
//! scheduler.run().unwrap();
//! ```

pub mod error;
pub mod reactor;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult, TaskError, WaitFault};
pub use reactor::{PollReactor, PollTimeout, Reactor, Readiness};
pub use scheduler::{
    Coroutine, ResumeValue, Scheduler, SchedulerStats, Step, SystemCall, Task, TaskId, TaskState,
};
