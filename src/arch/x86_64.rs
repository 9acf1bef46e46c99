//! x86_64 implementation of context switching

use std::arch::naked_asm;

/// Saved CPU context for context switching
///
/// On x86_64 System V ABI, these are the callee-saved registers
/// that must be preserved across function calls.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    /// General purpose (callee-saved)
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Context {
    /// Create a context whose first restore runs `entry(arg)` on a fresh stack.
    ///
    /// - `stack_top`: The top of the stack (highest address), 16-byte aligned
    /// - `entry`: Function the trampoline calls, passed in r14
    /// - `arg`: Its single argument, passed in r15
    pub fn new(stack_top: usize, entry: usize, arg: u64) -> Self {
        // Stack layout (growing downward):
        //   stack_top - 8:  (padding for alignment)
        //   stack_top - 16: return address (trampoline)
        //
        // The first `ret` pops the trampoline address, leaving RSP = 16n+8,
        // the same state as right after a `call`.
        let initial_rsp = stack_top - 16;

        unsafe {
            std::ptr::write(initial_rsp as *mut u64, trampoline as usize as u64);
        }

        Context {
            rsp: initial_rsp as u64,
            r14: entry as u64,
            r15: arg,
            ..Default::default()
        }
    }
}

/// First code executed by a fresh context.
///
/// Moves the argument into the first parameter register, realigns the stack
/// and calls the entry function, which never returns.
#[unsafe(naked)]
extern "C" fn trampoline() {
    naked_asm!(
        "mov rdi, r15",
        "and rsp, -16",
        "call r14",
        "ud2",
    );
}

/// Switch from one context to another
///
/// Saves the current CPU state into `old` and restores state from `new`.
/// This function returns when another context switches back to `old`.
///
/// # Safety
/// Both pointers must be valid. The `new` context must have been properly
/// initialized (either by a previous `context_switch` or by `Context::new`).
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save callee-saved registers to old context (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load callee-saved registers from new context (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Fresh context: pops the trampoline address and jumps there.
        // Suspended context: returns to where it called context_switch.
        "ret",
    );
}
