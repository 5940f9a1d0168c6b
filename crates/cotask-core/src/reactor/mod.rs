//! Readiness primitive - reports which resources are ready for I/O.
//!
//! The scheduler's poller hands a set of read candidates and write candidates
//! to a [`Reactor`] and gets back the subset that became ready. The
//! production implementation multiplexes with `poll(2)`; tests substitute a
//! scripted reactor.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

mod poll;

pub use poll::PollReactor;

/// How long a readiness check may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTimeout {
    /// Check without blocking and return immediately.
    Immediate,
    /// Block up to the given duration.
    Bounded(Duration),
    /// Block until at least one candidate is ready.
    Indefinite,
}

impl PollTimeout {
    /// Millisecond representation used by `poll(2)`: `0`, bounded, or `-1`.
    pub fn as_poll_millis(self) -> i32 {
        match self {
            PollTimeout::Immediate => 0,
            PollTimeout::Bounded(d) => d.as_millis().min(i32::MAX as u128) as i32,
            PollTimeout::Indefinite => -1,
        }
    }
}

/// Outcome of one readiness check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Read candidates that became readable
    pub readable: Vec<RawFd>,
    /// Write candidates that became writable
    pub writable: Vec<RawFd>,
    /// Candidates that can never become ready (e.g. closed descriptors);
    /// waiters on these must be failed, not left hanging
    pub faulted: Vec<RawFd>,
}

impl Readiness {
    /// True when no candidate became ready or faulted.
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty() && self.faulted.is_empty()
    }
}

/// Trait for the external readiness-multiplexing primitive.
///
/// Contract: block until at least one candidate is ready or the timeout
/// elapses, and report which became ready. An interrupted wait (`EINTR`)
/// reports an empty [`Readiness`], not an error.
pub trait Reactor {
    /// Check `read` candidates for readability and `write` candidates for
    /// writability, blocking at most `timeout`.
    fn poll(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: PollTimeout,
    ) -> io::Result<Readiness>;
}
