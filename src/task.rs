//! The task record and the handles used to refer to it.

use crate::context::{Context, EntryFn, Stack};
use crate::error::fatal;
use std::any::Any;
use std::fmt;
use std::num::NonZeroU64;
use std::time::Instant;

/// Stack size for tasks spawned without an explicit size (128KB)
pub const STACK_SIZE: usize = 128 * 1024;

/// Stack size reserved for the entry task wrapped by `cotask::main` (256KB)
pub const MAIN_STACK_SIZE: usize = 256 * 1024;

/// Bytes that must always remain free below the current stack pointer.
const STACK_RED_ZONE: usize = 256;

/// Unique, monotonically increasing task identifier. Never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub(crate) fn from_u64(id: u64) -> Self {
        let Some(id) = NonZeroU64::new(id) else {
            fatal("task id zero is reserved");
        };
        TaskId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A reference to a live task, as stored in run and wait queues.
///
/// The arena key is reused after a task exits; the id is not. Every lookup
/// checks both, so a stale reference is caught instead of waking a stranger.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TaskRef {
    pub(crate) key: usize,
    pub(crate) id: TaskId,
}

impl TaskRef {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// The one queue a task may currently be a member of.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum QueueTag {
    RunQueue,
    Wait,
    Sleep,
    Poll,
}

/// Run state as shown in the task table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Running,
    Ready,
    Blocked,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RunState::Running => "(running)",
            RunState::Ready => "(ready)",
            RunState::Blocked => "-",
        })
    }
}

/// A cooperatively scheduled unit of execution with its own stack.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) state: String,
    pub(crate) context: Context,
    pub(crate) stack: Stack,
    pub(crate) ready: bool,
    pub(crate) system: bool,
    pub(crate) exiting: bool,
    /// Deadline, only meaningful while on the sleep queue.
    pub(crate) wake_at: Option<Instant>,
    /// Taken by the task entry on first run.
    pub(crate) entry: Option<Box<dyn FnOnce()>>,
    pub(crate) data: Option<Box<dyn Any>>,
    pub(crate) queued: Option<QueueTag>,
    /// Index in the all-tasks registry.
    pub(crate) slot: usize,
}

impl Task {
    /// Allocate a task whose first run calls `start(key)`.
    pub(crate) fn new(
        id: TaskId,
        key: usize,
        name: String,
        stack_size: usize,
        start: EntryFn,
        entry: Box<dyn FnOnce()>,
    ) -> Self {
        let mut stack = Stack::new(stack_size);
        let context = Context::for_task(&mut stack, start, key);

        Task {
            id,
            name,
            state: String::new(),
            context,
            stack,
            ready: false,
            system: false,
            exiting: false,
            wake_at: None,
            entry: Some(entry),
            data: None,
            queued: None,
            slot: 0,
        }
    }

    /// Abort if fewer than `n` bytes (plus a fixed red zone) remain between
    /// `sp` and the base of this task's stack.
    pub(crate) fn check_stack(&self, sp: usize, n: usize) {
        let base = self.stack.base();
        if sp <= base || sp - base < STACK_RED_ZONE + n {
            fatal(format_args!(
                "task stack overflow: task={} sp={:#x} stack={:#x}+{} n={}",
                self.id,
                sp,
                base,
                self.stack.size(),
                STACK_RED_ZONE + n
            ));
        }
    }
}
