//! Portable execution-context primitives.
//!
//! This module is the only place the rest of the runtime touches machine state:
//! - `Stack`: an owned, fixed-size task stack
//! - `Context::for_task`: prepare a context that starts running `entry(arg)`
//! - `switch`: save the current context and restore another one

pub(crate) use crate::arch::Context;

/// Required alignment of the initial stack pointer on every supported ABI.
const STACK_ALIGN: usize = 16;

/// Entry point of a fresh context. It receives the argument given to
/// `Context::for_task` and must never return.
pub(crate) type EntryFn = extern "C" fn(usize) -> !;

/// An owned task stack. Allocated once, never resized.
pub(crate) struct Stack {
    buf: Box<[u8]>,
}

impl Stack {
    pub(crate) fn new(size: usize) -> Self {
        Stack {
            buf: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Lowest usable address. The stack grows down towards it.
    pub(crate) fn base(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    /// Highest address, aligned down for the ABI.
    pub(crate) fn top(&self) -> usize {
        (self.base() + self.buf.len()) & !(STACK_ALIGN - 1)
    }

    pub(crate) fn size(&self) -> usize {
        self.buf.len()
    }
}

impl Context {
    /// Prepare a context that, when first switched to, runs `entry(arg)` on
    /// top of `stack`.
    pub(crate) fn for_task(stack: &mut Stack, entry: EntryFn, arg: usize) -> Self {
        Context::new(stack.top(), entry as usize, arg as u64)
    }
}

/// Save the running state into `from` and resume `to`.
///
/// Returns once some later `switch` restores `from`.
///
/// # Safety
/// Both pointers must be valid for the duration of the call and `to` must
/// hold either a state saved by a previous `switch` or one built by
/// `Context::for_task` whose stack is still alive.
pub(crate) unsafe fn switch(from: *mut Context, to: *const Context) {
    unsafe { crate::arch::context_switch(from, to) }
}
