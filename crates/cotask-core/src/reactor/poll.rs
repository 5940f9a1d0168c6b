//! `poll(2)`-based reactor.
//!
//! Wait-set entries are one-shot: they are dropped as soon as readiness
//! fires, and the candidate sets are rebuilt on every check.

use super::{PollTimeout, Reactor, Readiness};
use std::io;
use std::os::unix::io::RawFd;

/// Readiness reactor over `poll(2)`.
pub struct PollReactor {
    /// Reused pollfd buffer
    fds: Vec<libc::pollfd>,
}

impl PollReactor {
    /// Create a new reactor.
    pub fn new() -> Self {
        PollReactor { fds: Vec::new() }
    }
}

impl Default for PollReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for PollReactor {
    fn poll(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: PollTimeout,
    ) -> io::Result<Readiness> {
        self.fds.clear();
        for &fd in read {
            self.fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        for &fd in write {
            self.fds.push(libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            });
        }

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout.as_poll_millis(),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            // EINTR is not an error, just no events
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::default());
            }
            return Err(err);
        }

        let mut readiness = Readiness::default();
        if n == 0 {
            return Ok(readiness);
        }

        for (i, pfd) in self.fds.iter().enumerate() {
            if pfd.revents == 0 {
                continue;
            }
            if pfd.revents & libc::POLLNVAL != 0 {
                readiness.faulted.push(pfd.fd);
                continue;
            }
            // POLLERR/POLLHUP count as ready: the waiter's own read/write
            // call surfaces the underlying error.
            if i < read.len() {
                readiness.readable.push(pfd.fd);
            } else {
                readiness.writable.push(pfd.fd);
            }
        }

        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        unsafe {
            assert_eq!(libc::pipe(fds.as_mut_ptr()), 0);
        }
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn test_empty_pipe_is_not_readable() {
        let (read_fd, write_fd) = pipe_pair();
        let mut reactor = PollReactor::new();

        let readiness = reactor
            .poll(&[read_fd], &[], PollTimeout::Immediate)
            .expect("poll failed");
        assert!(readiness.is_empty());

        close(read_fd);
        close(write_fd);
    }

    #[test]
    fn test_pipe_readable_after_write() {
        let (read_fd, write_fd) = pipe_pair();
        let mut reactor = PollReactor::new();

        unsafe {
            libc::write(write_fd, b"hello".as_ptr() as *const _, 5);
        }

        let readiness = reactor
            .poll(&[read_fd], &[], PollTimeout::Bounded(std::time::Duration::from_millis(100)))
            .expect("poll failed");
        assert_eq!(readiness.readable, vec![read_fd]);
        assert!(readiness.writable.is_empty());
        assert!(readiness.faulted.is_empty());

        close(read_fd);
        close(write_fd);
    }

    #[test]
    fn test_pipe_write_end_is_writable() {
        let (read_fd, write_fd) = pipe_pair();
        let mut reactor = PollReactor::new();

        let readiness = reactor
            .poll(&[], &[write_fd], PollTimeout::Immediate)
            .expect("poll failed");
        assert_eq!(readiness.writable, vec![write_fd]);

        close(read_fd);
        close(write_fd);
    }

    #[test]
    fn test_closed_fd_reports_faulted() {
        let (read_fd, write_fd) = pipe_pair();
        close(read_fd);
        close(write_fd);

        let mut reactor = PollReactor::new();
        let readiness = reactor
            .poll(&[read_fd], &[], PollTimeout::Immediate)
            .expect("poll failed");
        assert_eq!(readiness.faulted, vec![read_fd]);
        assert!(readiness.readable.is_empty());
    }

    #[test]
    fn test_same_fd_in_both_directions() {
        let (read_fd, write_fd) = pipe_pair();
        let mut reactor = PollReactor::new();

        unsafe {
            libc::write(write_fd, b"x".as_ptr() as *const _, 1);
        }

        // The read end is a read candidate, the write end a write candidate;
        // both are reported in their own direction.
        let readiness = reactor
            .poll(&[read_fd], &[write_fd], PollTimeout::Immediate)
            .expect("poll failed");
        assert_eq!(readiness.readable, vec![read_fd]);
        assert_eq!(readiness.writable, vec![write_fd]);

        close(read_fd);
        close(write_fd);
    }
}
