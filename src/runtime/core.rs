//! Per-thread scheduler state.
//!
//! Exactly one `Core` exists per thread while a runtime is driving tasks. It
//! is reached through `with_core`, whose borrow must never be held across a
//! context switch.

use crate::context::Context;
use crate::error::{RuntimeError, fatal};
use crate::runtime::builder::RuntimeConfig;
use crate::runtime::poll::Reactor;
use crate::task::{QueueTag, RunState, Task, TaskId, TaskRef};
use slab::Slab;
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::thread_local;

thread_local! {
    static CORE: RefCell<Option<Core>> = const { RefCell::new(None) };
}

pub(crate) struct Core {
    /// Task arena. Keys are reused, ids are not.
    tasks: Slab<Task>,
    /// Dense all-tasks registry, in creation order until a removal swaps.
    all: Vec<TaskRef>,
    run_queue: VecDeque<TaskRef>,
    /// Task currently executing, `None` while the dispatch loop runs.
    pub(crate) running: Option<TaskRef>,
    /// Context of the dispatch loop itself.
    pub(crate) sched_context: Context,
    next_id: u64,
    /// Tasks not yet exited, excluding system tasks.
    pub(crate) live: usize,
    /// Number of dispatches performed so far.
    pub(crate) nswitch: u64,
    /// Exit code recorded by the last exiting task.
    pub(crate) exit_code: i32,
    /// Panic payload of a task that unwound to its entry.
    pub(crate) panic: Option<Box<dyn Any + Send>>,
    pub(crate) rng: fastrand::Rng,
    pub(crate) reactor: Reactor,
    pub(crate) cfg: RuntimeConfig,
}

impl Core {
    pub(crate) fn new(cfg: RuntimeConfig) -> Self {
        let rng = match cfg.rng_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };

        Core {
            tasks: Slab::with_capacity(64),
            all: Vec::with_capacity(64),
            run_queue: VecDeque::new(),
            running: None,
            sched_context: Context::default(),
            next_id: 1,
            live: 0,
            nswitch: 0,
            exit_code: 0,
            panic: None,
            rng,
            reactor: Reactor::default(),
            cfg,
        }
    }

    /// Allocate and register a task, then mark it ready. It does not run yet.
    pub(crate) fn spawn(
        &mut self,
        name: String,
        stack_size: usize,
        system: bool,
        entry: Box<dyn FnOnce()>,
    ) -> TaskRef {
        let id = TaskId::from_u64(self.next_id);
        self.next_id += 1;

        let entry_slot = self.tasks.vacant_entry();
        let key = entry_slot.key();
        let mut task = Task::new(
            id,
            key,
            name,
            stack_size,
            crate::runtime::scheduler::task_main,
            entry,
        );
        task.system = system;
        task.slot = self.all.len();
        entry_slot.insert(task);

        let task = TaskRef { key, id };
        self.all.push(task);
        if !system {
            self.live += 1;
        }

        tracing::debug!(task = %id, stack_size, system, "spawn");
        self.mark_ready(task);
        task
    }

    #[track_caller]
    pub(crate) fn task(&self, task: TaskRef) -> &Task {
        match self.tasks.get(task.key) {
            Some(t) if t.id == task.id => t,
            _ => fatal(format_args!("stale task reference: {}", task.id)),
        }
    }

    #[track_caller]
    pub(crate) fn task_mut(&mut self, task: TaskRef) -> &mut Task {
        match self.tasks.get_mut(task.key) {
            Some(t) if t.id == task.id => t,
            _ => fatal(format_args!("stale task reference: {}", task.id)),
        }
    }

    #[track_caller]
    pub(crate) fn current(&self) -> TaskRef {
        match self.running {
            Some(task) => task,
            None => fatal("no task is running"),
        }
    }

    /// Record that `task` joined the queue identified by `tag`.
    ///
    /// A task is a member of at most one queue at a time; a second enqueue
    /// means two wake paths raced and is fatal.
    #[track_caller]
    pub(crate) fn enqueue_tag(&mut self, task: TaskRef, tag: QueueTag) {
        let t = self.task_mut(task);
        if let Some(prev) = t.queued {
            fatal(format_args!(
                "task {} queued on {:?} while already on {:?}",
                t.id, tag, prev
            ));
        }
        t.queued = Some(tag);
    }

    #[track_caller]
    pub(crate) fn dequeue_tag(&mut self, task: TaskRef, tag: QueueTag) {
        let t = self.task_mut(task);
        if t.queued != Some(tag) {
            fatal(format_args!(
                "task {} removed from {:?} but queued on {:?}",
                t.id, tag, t.queued
            ));
        }
        t.queued = None;
    }

    /// Set the ready flag and append to the run queue.
    #[track_caller]
    pub(crate) fn mark_ready(&mut self, task: TaskRef) {
        self.enqueue_tag(task, QueueTag::RunQueue);
        self.task_mut(task).ready = true;
        self.run_queue.push_back(task);
    }

    pub(crate) fn pop_ready(&mut self) -> Option<TaskRef> {
        let task = self.run_queue.pop_front()?;
        self.dequeue_tag(task, QueueTag::RunQueue);
        self.task_mut(task).ready = false;
        Some(task)
    }

    pub(crate) fn any_ready(&self) -> bool {
        !self.run_queue.is_empty()
    }

    /// Exclude `task` from the liveness count. Idempotent.
    pub(crate) fn mark_system(&mut self, task: TaskRef) {
        let t = self.task_mut(task);
        if !t.system {
            t.system = true;
            self.live -= 1;
        }
    }

    /// Unregister an exited task. The caller drops the returned record
    /// outside of any runtime borrow.
    pub(crate) fn remove(&mut self, task: TaskRef) -> Task {
        let slot = self.task(task).slot;
        self.all.swap_remove(slot);
        if let Some(&moved) = self.all.get(slot) {
            self.task_mut(moved).slot = slot;
        }

        let t = self.tasks.remove(task.key);
        if !t.system {
            self.live -= 1;
        }
        t
    }

    pub(crate) fn len(&self) -> usize {
        self.all.len()
    }

    /// Pick uniformly in `0..n`.
    pub(crate) fn random(&mut self, n: usize) -> usize {
        self.rng.usize(..n)
    }

    fn run_state(&self, task: TaskRef) -> RunState {
        if self.running == Some(task) {
            RunState::Running
        } else if self.task(task).ready {
            RunState::Ready
        } else {
            RunState::Blocked
        }
    }

    /// Write the table of every registered task.
    pub(crate) fn write_table(&self, w: &mut dyn Write) -> io::Result<()> {
        const RULE: &str = "-------------------------------------------------------------------";

        writeln!(w, "task list:")?;
        writeln!(w, "{RULE}")?;
        writeln!(w, "{:<6}\t{:<15}\t{:<25}\t{:<15}", "TaskID", "TaskName", "State", "Extra")?;
        writeln!(w, "{RULE}")?;

        for &task in &self.all {
            let t = self.task(task);
            let id = format!("{}{}", t.id, if t.system { 's' } else { ' ' });
            writeln!(
                w,
                "{:<6}\t{:<15}\t{:<25}\t{:<15}",
                id,
                t.name,
                t.state,
                self.run_state(task)
            )?;
        }
        Ok(())
    }
}

/// Install a fresh core on this thread.
pub(crate) fn install(core: Core) -> Result<(), RuntimeError> {
    CORE.with(|cell| {
        let mut slot = cell
            .try_borrow_mut()
            .map_err(|_| RuntimeError::AlreadyRunning)?;
        if slot.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }
        *slot = Some(core);
        Ok(())
    })
}

/// Remove the core from this thread. The caller drops it.
pub(crate) fn uninstall() -> Option<Core> {
    CORE.with(|cell| cell.borrow_mut().take())
}

/// Run `f` against this thread's core.
///
/// Fatal if no runtime is running or if the core is already borrowed.
#[track_caller]
pub(crate) fn with_core<R>(f: impl FnOnce(&mut Core) -> R) -> R {
    match try_with_core(f) {
        Some(out) => out,
        None => fatal("called outside of a running cotask runtime"),
    }
}

/// Like `with_core`, but returns `None` when no runtime is installed.
#[track_caller]
pub(crate) fn try_with_core<R>(f: impl FnOnce(&mut Core) -> R) -> Option<R> {
    CORE.with(|cell| {
        let Ok(mut slot) = cell.try_borrow_mut() else {
            fatal("runtime core re-entered while borrowed");
        };
        slot.as_mut().map(f)
    })
}
