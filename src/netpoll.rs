//! Descriptor readiness polling.
//!
//! A flat `poll(2)` interest list. One entry per waiting task; entries are
//! dropped as soon as they report, so the list only ever holds tasks that are
//! still parked.

use crate::error::fatal;
use crate::task::TaskRef;
use std::io;
use std::os::fd::RawFd;

/// Most descriptors that can be waited on at once.
pub(crate) const MAX_FDS: usize = 1024;

/// Readiness a task waits for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn events(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        }
    }
}

#[derive(Default)]
pub(crate) struct PollSet {
    fds: Vec<libc::pollfd>,
    /// `waiters[i]` is parked on `fds[i]`.
    waiters: Vec<TaskRef>,
}

impl PollSet {
    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest, task: TaskRef) {
        if self.fds.len() >= MAX_FDS {
            fatal(format_args!("too many poll file descriptors (max {MAX_FDS})"));
        }

        self.fds.push(libc::pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        });
        self.waiters.push(task);
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Wait up to `timeout_ms` (-1 = forever) and remove every entry that
    /// reported an event, returning its task.
    ///
    /// A wait interrupted by a signal returns nothing ready, so the caller
    /// gets a chance to act on the signal and recompute its timeout.
    ///
    /// Error and hang-up conditions count as ready; the woken task sees them
    /// on its next read or write.
    pub(crate) fn poll(&mut self, timeout_ms: i32) -> io::Result<Vec<TaskRef>> {
        // Safety: `fds` is a valid, initialized slice of pollfd.
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                tracing::debug!("poll interrupted");
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.fds.len() {
            if self.fds[i].revents != 0 {
                self.fds.swap_remove(i);
                ready.push(self.waiters.swap_remove(i));
            } else {
                i += 1;
            }
        }
        Ok(ready)
    }
}
