//! The readiness loop.
//!
//! A system task, spawned on the first `sleep` or `wait_fd`, that blocks the
//! thread in `poll(2)` whenever no other task is ready to run and readies the
//! tasks whose descriptor reported or whose deadline passed.

use crate::error::fatal;
use crate::netpoll::PollSet;
use crate::runtime::core::{Core, with_core};
use crate::runtime::scheduler::{park, set_state, yield_now};
use crate::runtime::timer::SleepQueue;
use crate::task::{QueueTag, TaskRef};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

pub use crate::netpoll::Interest;

const POLLER_STACK_SIZE: usize = 64 * 1024;

/// Longest single wait while sleepers exist. Bounds the damage of a clock
/// that jumps.
const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub(crate) struct Reactor {
    pub(crate) pollset: PollSet,
    pub(crate) sleepers: SleepQueue,
    poller: Option<TaskRef>,
    /// The poller parked itself because nothing was registered.
    idle: bool,
}

/// Spawn the poller on first use, or wake it if it went idle.
pub(crate) fn ensure_poller(core: &mut Core) {
    match core.reactor.poller {
        None => {
            let poller = core.spawn(
                "fdtask".to_string(),
                POLLER_STACK_SIZE,
                true,
                Box::new(poller_loop),
            );
            core.reactor.poller = Some(poller);
        }
        Some(poller) if core.reactor.idle => {
            core.reactor.idle = false;
            core.mark_ready(poller);
        }
        Some(_) => {}
    }
}

/// Milliseconds to block in `poll(2)`, or `None` when there is nothing to
/// wait for at all.
fn poll_timeout(core: &Core, now: Instant) -> Option<i32> {
    match core.next_deadline() {
        Some(deadline) => {
            let wait = deadline.saturating_duration_since(now).min(MAX_POLL_TIMEOUT);
            // Round up so a sleeper is never woken before its deadline.
            Some(wait.as_micros().div_ceil(1000) as i32)
        }
        None if core.reactor.pollset.is_empty() => None,
        None => Some(-1),
    }
}

fn poller_loop() {
    set_state("poll");

    loop {
        // Only block the thread once every other task has had its turn.
        while yield_now() > 0 {}

        let timeout = with_core(|core| {
            let timeout = poll_timeout(core, Instant::now());
            core.reactor.idle = timeout.is_none();
            timeout
        });

        let Some(timeout) = timeout else {
            tracing::debug!("poller idle");
            set_state("idle");
            park();
            set_state("poll");
            continue;
        };

        with_core(|core| {
            tracing::trace!(
                timeout,
                fds = core.reactor.pollset.len(),
                sleepers = core.reactor.sleepers.len(),
                "poll"
            );

            let ready = match core.reactor.pollset.poll(timeout) {
                Ok(ready) => ready,
                Err(err) => fatal(format_args!("poll: {err}")),
            };
            for task in ready {
                core.dequeue_tag(task, QueueTag::Poll);
                core.mark_ready(task);
            }

            core.wake_sleepers(Instant::now());
        });
    }
}

/// Suspend the running task until `fd` is ready for `interest`.
///
/// Error and hang-up conditions on the descriptor also wake the task.
pub fn wait_fd(fd: RawFd, interest: Interest) {
    with_core(|core| {
        ensure_poller(core);
        let task = core.current();
        core.enqueue_tag(task, QueueTag::Poll);
        core.reactor.pollset.register(fd, interest, task);
    });
    set_state(match interest {
        Interest::Read => "fdwait for read",
        Interest::Write => "fdwait for write",
    });

    park();
}
