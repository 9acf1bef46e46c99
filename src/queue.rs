use crate::runtime::core::with_core;
use crate::task::{QueueTag, TaskRef};
use std::collections::VecDeque;

/// FIFO of parked tasks, as used by the locks and by `Rendez`.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    tasks: VecDeque<TaskRef>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Append the running task. The caller parks right after.
    pub(crate) fn push_current(&mut self) -> TaskRef {
        with_core(|core| {
            let task = core.current();
            core.enqueue_tag(task, QueueTag::Wait);
            self.tasks.push_back(task);
            task
        })
    }

    /// Remove the head and mark it ready.
    pub(crate) fn wake_one(&mut self) -> Option<TaskRef> {
        let task = self.tasks.pop_front()?;
        with_core(|core| {
            core.dequeue_tag(task, QueueTag::Wait);
            core.mark_ready(task);
        });
        Some(task)
    }

    /// Mark every waiter ready, in order. Returns how many woke.
    pub(crate) fn wake_all(&mut self) -> usize {
        let mut n = 0;
        while self.wake_one().is_some() {
            n += 1;
        }
        n
    }
}
