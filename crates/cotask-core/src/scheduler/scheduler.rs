//! Run loop, task registry, ready queue and wait sets

use crate::error::{SchedulerError, SchedulerResult, WaitFault};
use crate::reactor::{PollReactor, PollTimeout, Reactor, Readiness};
use crate::scheduler::{Coroutine, ResumeValue, Step, Task, TaskId, TaskState};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks that ran to completion
    pub tasks_completed: u64,

    /// Total tasks removed after an unhandled error
    pub tasks_failed: u64,

    /// Total tasks removed by kill
    pub tasks_killed: u64,

    /// Currently live tasks
    pub active_tasks: usize,

    /// Tasks currently in the ready queue
    pub ready_len: usize,
}

/// Single-threaded cooperative scheduler.
///
/// Owns every live task, the FIFO ready queue and the per-resource wait
/// sets. All state is mutated exclusively by the run loop and by system
/// calls invoked from it, never concurrently, so no locking exists anywhere
/// in the core.
pub struct Scheduler {
    /// Task registry: owns every live task by id
    tasks: FxHashMap<TaskId, Task>,

    /// FIFO ready queue of ids (not task handles, so a kill cannot dangle)
    ready: VecDeque<TaskId>,

    /// Tasks suspended until a resource becomes readable, insertion order
    /// preserved per resource
    wait_read: FxHashMap<RawFd, Vec<TaskId>>,

    /// Tasks suspended until a resource becomes writable
    wait_write: FxHashMap<RawFd, Vec<TaskId>>,

    /// The readiness primitive the poller multiplexes with
    reactor: Box<dyn Reactor>,

    /// Next id to hand out; ids are never reused
    next_id: TaskId,

    /// The readiness poller's id while the run loop is active
    poller: Option<TaskId>,

    /// The task currently being advanced (or applying its system call)
    running: Option<TaskId>,

    tasks_spawned: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    tasks_killed: u64,
}

impl Scheduler {
    /// Create a scheduler backed by the `poll(2)` reactor.
    pub fn new() -> Self {
        Self::with_reactor(Box::new(PollReactor::new()))
    }

    /// Create a scheduler backed by a caller-supplied readiness primitive.
    pub fn with_reactor(reactor: Box<dyn Reactor>) -> Self {
        Self {
            tasks: FxHashMap::default(),
            ready: VecDeque::new(),
            wait_read: FxHashMap::default(),
            wait_write: FxHashMap::default(),
            reactor,
            next_id: TaskId::first(),
            poller: None,
            running: None,
            tasks_spawned: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            tasks_killed: 0,
        }
    }

    /// Register a new task and enqueue it. Returns its id.
    pub fn spawn(&mut self, coroutine: impl Coroutine + 'static) -> TaskId {
        self.spawn_boxed(Box::new(coroutine))
    }

    pub(crate) fn spawn_boxed(&mut self, coroutine: Box<dyn Coroutine>) -> TaskId {
        let id = self.allocate_id();
        self.tasks.insert(id, Task::new(id, coroutine));
        self.tasks_spawned += 1;
        self.schedule(id);
        log::trace!("spawned task {:?}", id);
        id
    }

    /// Remove a task from the registry, the ready queue and any wait set.
    ///
    /// Returns `false` when the id is unknown; this is a normal result, not
    /// an error, and leaves all scheduler state untouched.
    pub fn kill(&mut self, id: TaskId) -> bool {
        if self.tasks.remove(&id).is_none() {
            log::trace!("kill {:?}: no such task", id);
            return false;
        }
        self.ready.retain(|&queued| queued != id);
        Self::purge_wait_set(&mut self.wait_read, id);
        Self::purge_wait_set(&mut self.wait_write, id);
        self.tasks_killed += 1;
        log::debug!("killed task {:?}", id);
        true
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Where a live task currently sits, or `None` for unknown ids.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        if self.running == Some(id) {
            return Some(TaskState::Running);
        }
        if !self.tasks.contains_key(&id) {
            return None;
        }
        if self.ready.contains(&id) {
            return Some(TaskState::Ready);
        }
        if self.wait_read.values().any(|w| w.contains(&id)) {
            return Some(TaskState::WaitingRead);
        }
        if self.wait_write.values().any(|w| w.contains(&id)) {
            return Some(TaskState::WaitingWrite);
        }
        // registered but in no structure: the issuer of the system call
        // being applied right now
        Some(TaskState::Running)
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_spawned: self.tasks_spawned,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            tasks_killed: self.tasks_killed,
            active_tasks: self.tasks.len(),
            ready_len: self.ready.len(),
        }
    }

    /// Drive every task to completion.
    ///
    /// Injects the readiness poller into the ready queue, then dequeues and
    /// advances tasks until the queue drains, which happens once every
    /// non-polling task has finished and no readiness waits remain.
    pub fn run(&mut self) -> SchedulerResult<()> {
        let poller_id = self.allocate_id();
        self.poller = Some(poller_id);
        self.schedule(poller_id);
        log::debug!("run loop started, poller is {:?}", poller_id);

        while let Some(id) = self.ready.pop_front() {
            if Some(id) == self.poller {
                self.poll_activation(poller_id)?;
                continue;
            }

            self.running = Some(id);
            let step = match self.tasks.get_mut(&id) {
                Some(task) => task.advance(),
                None => {
                    debug_assert!(false, "ready task {:?} missing from registry", id);
                    self.running = None;
                    continue;
                }
            };

            match step {
                Ok(Step::Syscall(call)) => {
                    log::trace!("task {:?} issued {:?}", id, call);
                    call.apply(id, self);
                }
                Ok(Step::Yield) => {
                    self.schedule(id);
                }
                Ok(Step::Done) => {
                    self.tasks.remove(&id);
                    self.tasks_completed += 1;
                    log::trace!("task {:?} completed", id);
                }
                Err(e) => {
                    // isolation: the failure is the task's alone
                    self.tasks.remove(&id);
                    Self::purge_wait_set(&mut self.wait_read, id);
                    Self::purge_wait_set(&mut self.wait_write, id);
                    self.tasks_failed += 1;
                    log::error!("task {:?} failed: {}", id, e);
                }
            }
            self.running = None;
        }

        self.poller = None;
        log::debug!("run loop drained");
        Ok(())
    }

    // ========================================================================
    // System-call surface (crate-internal)
    // ========================================================================

    pub(crate) fn set_resume_value(&mut self, id: TaskId, value: ResumeValue) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.set_resume_value(value);
        }
    }

    /// Enqueue a task for its next advance.
    pub(crate) fn schedule(&mut self, id: TaskId) {
        debug_assert!(
            self.tasks.contains_key(&id) || Some(id) == self.poller,
            "scheduling unregistered task {:?}",
            id
        );
        debug_assert!(
            !self.ready.contains(&id),
            "task {:?} enqueued twice",
            id
        );
        debug_assert!(
            !self.wait_read.values().any(|w| w.contains(&id))
                && !self.wait_write.values().any(|w| w.contains(&id)),
            "task {:?} is ready while waiting",
            id
        );
        self.ready.push_back(id);
    }

    pub(crate) fn wait_for_read(&mut self, fd: RawFd, id: TaskId) {
        self.wait_read.entry(fd).or_default().push(id);
    }

    pub(crate) fn wait_for_write(&mut self, fd: RawFd, id: TaskId) {
        self.wait_write.entry(fd).or_default().push(id);
    }

    // ========================================================================
    // Readiness poller
    // ========================================================================

    /// One activation of the readiness poller.
    ///
    /// Polls with a zero timeout while other work is ready (polling never
    /// starves runnable tasks) and indefinitely when the queue is otherwise
    /// empty (no busy-spin). With nothing to wait for it either retires
    /// (fully idle: lets `run` return) or skips the poll and yields.
    fn poll_activation(&mut self, poller_id: TaskId) -> SchedulerResult<()> {
        if self.wait_read.is_empty() && self.wait_write.is_empty() {
            if self.ready.is_empty() {
                log::debug!("poller {:?} retiring: scheduler is idle", poller_id);
                self.poller = None;
                return Ok(());
            }
            self.schedule(poller_id);
            return Ok(());
        }

        let timeout = if self.ready.is_empty() {
            PollTimeout::Indefinite
        } else {
            PollTimeout::Immediate
        };

        let read_fds: Vec<RawFd> = self.wait_read.keys().copied().collect();
        let write_fds: Vec<RawFd> = self.wait_write.keys().copied().collect();
        log::trace!(
            "polling {} read / {} write candidates ({:?})",
            read_fds.len(),
            write_fds.len(),
            timeout
        );

        let readiness = match self.reactor.poll(&read_fds, &write_fds, timeout) {
            Ok(r) => r,
            Err(e) => {
                self.poller = None;
                return Err(SchedulerError::Poll(e));
            }
        };
        self.dispatch_readiness(readiness);

        self.schedule(poller_id);
        Ok(())
    }

    /// Move every task whose resource fired back to the ready queue,
    /// preserving per-resource insertion order.
    fn dispatch_readiness(&mut self, readiness: Readiness) {
        for fd in readiness.readable {
            if let Some(waiters) = self.wait_read.remove(&fd) {
                self.wake(waiters, ResumeValue::Ready(fd));
            }
        }
        for fd in readiness.writable {
            if let Some(waiters) = self.wait_write.remove(&fd) {
                self.wake(waiters, ResumeValue::Ready(fd));
            }
        }
        for fd in readiness.faulted {
            let fault = WaitFault { fd };
            log::warn!("failing waiters on unpollable resource {}", fd);
            if let Some(waiters) = self.wait_read.remove(&fd) {
                self.wake(waiters, ResumeValue::Fault(fault));
            }
            if let Some(waiters) = self.wait_write.remove(&fd) {
                self.wake(waiters, ResumeValue::Fault(fault));
            }
        }
    }

    fn wake(&mut self, waiters: Vec<TaskId>, value: ResumeValue) {
        for id in waiters {
            // tombstone check: eager purge on kill makes a dead id here a
            // bug, but a stale wake must never resurrect one
            if self.tasks.contains_key(&id) {
                self.set_resume_value(id, value.clone());
                self.schedule(id);
            } else {
                debug_assert!(false, "stale wait-set entry for dead task {:?}", id);
            }
        }
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn purge_wait_set(wait_set: &mut FxHashMap<RawFd, Vec<TaskId>>, id: TaskId) {
        wait_set.retain(|_, waiters| {
            waiters.retain(|&waiting| waiting != id);
            !waiters.is_empty()
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::scheduler::SystemCall;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Records (label, iteration) once per turn, then finishes.
    fn counter(
        label: u64,
        max: u32,
        log: Rc<RefCell<Vec<(u64, u32)>>>,
    ) -> impl Coroutine {
        let mut i = 0;
        move |_: ResumeValue| {
            i += 1;
            if i > max {
                return Ok(Step::Done);
            }
            log.borrow_mut().push((label, i));
            Ok(Step::Yield)
        }
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.task_count(), 0);
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }

    #[test]
    fn test_spawn_ids_strictly_increase() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = scheduler.spawn(counter(1, 1, log.clone()));
        let b = scheduler.spawn(counter(2, 1, log.clone()));
        assert!(b > a);

        // ids are not reused after death
        assert!(scheduler.kill(b));
        let c = scheduler.spawn(counter(3, 1, log));
        assert!(c > b);
    }

    #[test]
    fn test_spawned_task_is_ready() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let id = scheduler.spawn(counter(1, 1, log));
        assert_eq!(scheduler.task_state(id), Some(TaskState::Ready));
        assert_eq!(scheduler.task_count(), 1);
        assert_eq!(scheduler.stats().ready_len, 1);
    }

    #[test]
    fn test_kill_unknown_id_changes_nothing() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.spawn(counter(1, 1, log.clone()));
        scheduler.spawn(counter(2, 1, log));

        let before = scheduler.stats();
        assert!(!scheduler.kill(TaskId::from_u64(999)));
        let after = scheduler.stats();

        assert_eq!(before.ready_len, after.ready_len);
        assert_eq!(before.active_tasks, after.active_tasks);
        assert_eq!(after.tasks_killed, 0);
    }

    #[test]
    fn test_kill_ready_task_never_runs() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let victim = scheduler.spawn(counter(1, 3, log.clone()));
        assert!(scheduler.kill(victim));
        assert_eq!(scheduler.task_state(victim), None);

        scheduler.run().unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_double_kill_reports_false() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let id = scheduler.spawn(counter(1, 1, log));
        assert!(scheduler.kill(id));
        assert!(!scheduler.kill(id));
        assert_eq!(scheduler.stats().tasks_killed, 1);
    }

    #[test]
    fn test_round_robin_interleaving() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        scheduler.spawn(counter(1, 3, log.clone()));
        scheduler.spawn(counter(2, 3, log.clone()));
        scheduler.run().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![(1, 1), (2, 1), (1, 2), (2, 2), (1, 3), (2, 3)]
        );
        assert_eq!(scheduler.task_count(), 0);
        assert_eq!(scheduler.stats().tasks_completed, 2);
    }

    #[test]
    fn test_identity_resumes_with_own_id() {
        let mut scheduler = Scheduler::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut spawned = Vec::new();
        for _ in 0..3 {
            let seen = seen.clone();
            let mut asked = false;
            spawned.push(scheduler.spawn(move |value: ResumeValue| {
                if !asked {
                    asked = true;
                    return Ok(Step::Syscall(SystemCall::Identity));
                }
                seen.borrow_mut().push(value);
                Ok(Step::Done)
            }));
        }
        scheduler.run().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        for (value, id) in seen.iter().zip(&spawned) {
            assert_eq!(value, &ResumeValue::Task(*id));
        }
    }

    #[test]
    fn test_spawn_syscall_returns_child_id() {
        let mut scheduler = Scheduler::new();
        let child_ran = Rc::new(Cell::new(false));
        let reported = Rc::new(Cell::new(None));

        let child_ran_in = child_ran.clone();
        let reported_in = reported.clone();
        let mut spawned = false;
        let parent = scheduler.spawn(move |value: ResumeValue| {
            if !spawned {
                spawned = true;
                let child_ran = child_ran_in.clone();
                return Ok(Step::Syscall(SystemCall::Spawn(Box::new(
                    move |_: ResumeValue| {
                        child_ran.set(true);
                        Ok(Step::Done)
                    },
                ))));
            }
            if let ResumeValue::Task(child) = value {
                reported_in.set(Some(child));
            }
            Ok(Step::Done)
        });
        scheduler.run().unwrap();

        assert!(child_ran.get());
        let child = reported.get().expect("parent never saw the child id");
        assert!(child > parent);
        assert_eq!(scheduler.stats().tasks_spawned, 2);
    }

    #[test]
    fn test_kill_syscall_on_unknown_id_resumes_false() {
        let mut scheduler = Scheduler::new();
        let outcome = Rc::new(Cell::new(None));

        let outcome_in = outcome.clone();
        let mut asked = false;
        scheduler.spawn(move |value: ResumeValue| {
            if !asked {
                asked = true;
                return Ok(Step::Syscall(SystemCall::Kill(TaskId::from_u64(999))));
            }
            if let ResumeValue::Flag(killed) = value {
                outcome_in.set(Some(killed));
            }
            Ok(Step::Done)
        });
        scheduler.run().unwrap();

        assert_eq!(outcome.get(), Some(false));
    }

    #[test]
    fn test_self_kill_terminates_cleanly() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let me = Rc::new(Cell::new(None));
        let me_in = me.clone();
        let mut asked = false;
        let id = scheduler.spawn(move |value: ResumeValue| {
            if !asked {
                asked = true;
                return Ok(Step::Syscall(SystemCall::Identity));
            }
            if let ResumeValue::Task(own) = value {
                me_in.set(Some(own));
                return Ok(Step::Syscall(SystemCall::Kill(own)));
            }
            // a self-killed task is never resumed
            unreachable!("resumed after killing itself");
        });
        scheduler.spawn(counter(7, 2, log.clone()));
        scheduler.run().unwrap();

        assert_eq!(me.get(), Some(id));
        assert_eq!(scheduler.stats().tasks_killed, 1);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_failing_task_does_not_stop_siblings() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        scheduler.spawn(|_: ResumeValue| -> Result<Step, TaskError> {
            Err(TaskError::other("deliberate failure"))
        });
        scheduler.spawn(counter(1, 3, log.clone()));
        scheduler.run().unwrap();

        assert_eq!(log.borrow().len(), 3);
        let stats = scheduler.stats();
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.active_tasks, 0);
    }

    #[test]
    fn test_run_on_empty_scheduler_returns() {
        let mut scheduler = Scheduler::new();
        scheduler.run().unwrap();
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn test_run_twice_keeps_allocating_fresh_ids() {
        let mut scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = scheduler.spawn(counter(1, 1, log.clone()));
        scheduler.run().unwrap();
        let b = scheduler.spawn(counter(2, 1, log));
        scheduler.run().unwrap();

        // the poller id allocated by the first run is also never reused
        assert!(b.as_u64() > a.as_u64() + 1);
    }
}
