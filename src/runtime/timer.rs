//! Sleeping tasks, ordered by deadline.

use crate::runtime::core::{Core, with_core};
use crate::runtime::poll;
use crate::runtime::scheduler::{park, set_state};
use crate::task::{QueueTag, TaskRef};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tasks parked in `sleep`, earliest deadline first. Tasks with equal
/// deadlines keep their insertion order.
#[derive(Default)]
pub(crate) struct SleepQueue {
    tasks: VecDeque<TaskRef>,
}

impl SleepQueue {
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl Core {
    fn deadline(&self, task: TaskRef) -> Instant {
        match self.task(task).wake_at {
            Some(at) => at,
            None => crate::error::fatal(format_args!("sleeping task {} has no deadline", task.id)),
        }
    }

    pub(crate) fn add_sleeper(&mut self, task: TaskRef, deadline: Instant) {
        self.enqueue_tag(task, QueueTag::Sleep);
        self.task_mut(task).wake_at = Some(deadline);

        let sleepers = &self.reactor.sleepers.tasks;
        let at = sleepers.partition_point(|&t| self.deadline(t) <= deadline);
        self.reactor.sleepers.tasks.insert(at, task);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let &task = self.reactor.sleepers.tasks.front()?;
        Some(self.deadline(task))
    }

    /// Ready every sleeper whose deadline is at or before `now`, in deadline
    /// order. Returns how many woke.
    pub(crate) fn wake_sleepers(&mut self, now: Instant) -> usize {
        let mut woken = 0;
        while let Some(&task) = self.reactor.sleepers.tasks.front() {
            if self.deadline(task) > now {
                break;
            }

            self.reactor.sleepers.tasks.pop_front();
            self.dequeue_tag(task, QueueTag::Sleep);
            self.task_mut(task).wake_at = None;
            self.mark_ready(task);
            woken += 1;
        }
        woken
    }
}

/// Suspend the running task for at least `duration`.
///
/// Returns the time actually elapsed, which is never less than `duration`
/// and may be more when other tasks run long between polls.
pub fn sleep(duration: Duration) -> Duration {
    let start = Instant::now();

    with_core(|core| {
        poll::ensure_poller(core);
        let task = core.current();
        core.add_sleeper(task, start + duration);
    });
    set_state("sleep");

    park();
    start.elapsed()
}

/// [`sleep`] in milliseconds.
pub fn sleep_for(ms: u64) -> u64 {
    sleep(Duration::from_millis(ms)).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{block_on, spawn};
    use anyhow::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_two_sleepers_wake_together() -> Result<()> {
        let elapsed = Rc::new(RefCell::new(Vec::new()));

        let started = Instant::now();
        let e = elapsed.clone();
        block_on(move || {
            for _ in 0..2 {
                let e = e.clone();
                spawn(move || {
                    let slept = sleep_for(50);
                    e.borrow_mut().push(slept);
                });
            }
        })?;

        let elapsed = elapsed.borrow();
        assert_eq!(elapsed.len(), 2);
        assert!(elapsed.iter().all(|&ms| ms >= 50));
        // They slept concurrently, not one after the other.
        assert!(started.elapsed() < Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn test_sleepers_wake_in_deadline_order() -> Result<()> {
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        block_on(move || {
            for ms in [40u64, 10, 25] {
                let o = o.clone();
                spawn(move || {
                    sleep_for(ms);
                    o.borrow_mut().push(ms);
                });
            }
        })?;

        assert_eq!(*order.borrow(), vec![10, 25, 40]);
        Ok(())
    }

    #[test]
    fn test_sleep_queue_orders_by_deadline() {
        let mut core = Core::new(crate::runtime::Builder::new().config());
        let now = Instant::now();

        let a = core.spawn("a".into(), 16 * 1024, false, Box::new(|| {}));
        let b = core.spawn("b".into(), 16 * 1024, false, Box::new(|| {}));
        let c = core.spawn("c".into(), 16 * 1024, false, Box::new(|| {}));
        while core.pop_ready().is_some() {}

        core.add_sleeper(a, now + Duration::from_millis(30));
        core.add_sleeper(b, now + Duration::from_millis(10));
        core.add_sleeper(c, now + Duration::from_millis(30));

        assert_eq!(core.reactor.sleepers.len(), 3);
        assert_eq!(core.next_deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(core.wake_sleepers(now + Duration::from_millis(20)), 1);
        assert_eq!(core.pop_ready(), Some(b));

        assert_eq!(core.wake_sleepers(now + Duration::from_millis(30)), 2);
        assert_eq!(core.pop_ready(), Some(a));
        assert_eq!(core.pop_ready(), Some(c));
        assert_eq!(core.reactor.sleepers.len(), 0);
    }
}
