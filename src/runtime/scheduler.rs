//! Cooperative dispatch and the suspension points every blocking primitive
//! is built on.

use crate::context::{self, Context};
use crate::error::fatal;
use crate::runtime::core::{try_with_core, with_core};
use crate::runtime::info;
use crate::task::{TaskId, TaskRef};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// How the dispatch loop ended.
pub(crate) enum Outcome {
    /// Every non-system task exited. Carries the last exit code.
    Exited(i32),
    /// Live tasks remain but the run queue is empty.
    Deadlock(usize),
    /// A task panicked. The payload is re-raised on the hosting thread.
    Panicked(Box<dyn Any + Send>),
}

enum Step {
    Run(*mut Context, *const Context),
    Stop(Outcome),
}

/// The dispatch loop. Runs on the hosting thread's own stack, never as a task.
pub(crate) fn run() -> Outcome {
    loop {
        if info::take_request() {
            let _ = with_core(|core| core.write_table(&mut std::io::stderr()));
        }

        let step = with_core(|core| {
            if core.live == 0 {
                return Step::Stop(Outcome::Exited(core.exit_code));
            }

            let Some(task) = core.pop_ready() else {
                tracing::debug!(live = core.live, tasks = core.len(), "run queue empty");
                return Step::Stop(Outcome::Deadlock(core.live));
            };

            core.running = Some(task);
            core.nswitch += 1;

            let t = core.task_mut(task);
            tracing::trace!(task = %t.id, name = %t.name, "dispatch");
            let to: *const Context = &t.context;
            let from: *mut Context = &mut core.sched_context;
            Step::Run(from, to)
        });

        let (from, to) = match step {
            Step::Run(from, to) => (from, to),
            Step::Stop(outcome) => return outcome,
        };

        // Safety: `from` lives in the installed core and `to` in the arena
        // entry of a live task; neither moves until the task switches back.
        unsafe { context::switch(from, to) };

        let (finished, panicked) = with_core(|core| {
            let task = core.current();
            core.running = None;

            let finished = core.task(task).exiting.then(|| core.remove(task));
            (finished, core.panic.take())
        });

        if let Some(task) = finished {
            tracing::debug!(task = %task.id, name = %task.name, "exit");
            drop(task);
        }

        if let Some(payload) = panicked {
            return Outcome::Panicked(payload);
        }
    }
}

/// First Rust frame of every task, reached through the arch trampoline.
pub(crate) extern "C" fn task_main(key: usize) -> ! {
    let entry = with_core(|core| {
        let task = core.current();
        if task.key != key {
            fatal(format_args!("task {} started on the wrong stack", task.id));
        }
        core.task_mut(task).entry.take()
    });

    if let Some(entry) = entry
        && let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry))
    {
        with_core(|core| core.panic = Some(payload));
        exit(101);
    }

    exit(0)
}

/// Switch from the running task back to the dispatch loop without
/// re-enqueueing it.
///
/// The caller must already have arranged its own wake-up (a wait queue, a
/// pending alt arm, the sleep queue, ...). Returns once some other task
/// marks it ready and the dispatch loop selects it again.
pub fn park() {
    need_stack(0);

    let (from, to) = with_core(|core| {
        let task = core.current();
        let from: *mut Context = &mut core.task_mut(task).context;
        let to: *const Context = &core.sched_context;
        (from, to)
    });

    // Safety: both contexts live in the installed core; the arena is not
    // touched between taking the pointers and switching.
    unsafe { context::switch(from, to) };
}

/// Mark a parked task ready and append it to the run queue.
///
/// Readying a task that is already queued anywhere (run queue, wait queue,
/// sleep queue, poll set) is a fatal usage error.
#[track_caller]
pub fn unpark(task: TaskRef) {
    with_core(|core| core.mark_ready(task));
}

/// Let every other ready task run once.
///
/// Returns how many other tasks ran before this one was resumed, 0 when it
/// was the only one ready.
pub fn yield_now() -> usize {
    let before = with_core(|core| {
        let task = core.current();
        core.mark_ready(task);
        core.nswitch
    });
    set_state("yield");

    park();

    let after = with_core(|core| core.nswitch);
    (after - before - 1) as usize
}

/// Exit the running task with `code`.
///
/// When the last non-system task exits, [`Runtime::block_on`] returns the code
/// of that task. Locals on the task's stack are not dropped.
///
/// [`Runtime::block_on`]: crate::runtime::Runtime::block_on
pub fn exit(code: i32) -> ! {
    with_core(|core| {
        let task = core.current();
        core.exit_code = code;
        core.task_mut(task).exiting = true;
    });
    set_state("exiting");

    park();
    fatal("exited task was resumed")
}

/// Terminate the whole process immediately with `code`.
pub fn exit_all(code: i32) -> ! {
    tracing::debug!(code, "exit all");
    std::process::exit(code)
}

/// Exclude the running task from the count of tasks that keep the runtime
/// alive.
pub fn mark_system() {
    with_core(|core| {
        let task = core.current();
        core.mark_system(task);
    });
}

/// Whether any task is waiting in the run queue.
pub fn any_ready() -> bool {
    with_core(|core| core.any_ready())
}

/// Handle to the running task.
pub fn current() -> TaskRef {
    with_core(|core| core.current())
}

/// Id of the running task.
pub fn id() -> TaskId {
    current().id()
}

/// Set the running task's name, shown in the task table.
pub fn set_name(name: impl Into<String>) {
    let name = name.into();
    with_core(|core| {
        let task = core.current();
        core.task_mut(task).name = name;
    });
}

pub fn name() -> String {
    with_core(|core| core.task(core.current()).name.clone())
}

/// Set the running task's status text, shown in the task table.
pub fn set_state(state: impl Into<String>) {
    let state = state.into();
    with_core(|core| {
        let task = core.current();
        core.task_mut(task).state = state;
    });
}

pub fn state() -> String {
    with_core(|core| core.task(core.current()).state.clone())
}

/// Store a value in the running task's user-data slot, returning the
/// previous one.
pub fn set_data<T: Any>(value: T) -> Option<Box<dyn Any>> {
    with_core(|core| {
        let task = core.current();
        core.task_mut(task).data.replace(Box::new(value))
    })
}

/// Take the running task's user data, leaving the slot empty.
pub fn take_data() -> Option<Box<dyn Any>> {
    with_core(|core| {
        let task = core.current();
        core.task_mut(task).data.take()
    })
}

/// Run `f` on the running task's user data, if it holds a `T`.
///
/// The value is taken out of the slot while `f` runs and put back afterwards,
/// so `f` may call back into the runtime. Anything `f` stores with
/// [`set_data`] is overwritten.
pub fn with_data<T: Any, R>(f: impl FnOnce(Option<&mut T>) -> R) -> R {
    let mut data = take_data();
    let out = f(data.as_mut().and_then(|d| d.downcast_mut::<T>()));

    if let Some(data) = data {
        with_core(|core| {
            let task = core.current();
            core.task_mut(task).data = Some(data);
        });
    }
    out
}

/// Abort if fewer than `n` bytes (plus a small red zone) remain on the
/// running task's stack.
///
/// A debugging aid: called on every suspension and before alt. Outside of a
/// task it does nothing.
#[inline(never)]
pub fn need_stack(n: usize) {
    let marker = 0u8;
    let sp = std::hint::black_box(&marker) as *const u8 as usize;

    try_with_core(|core| {
        if let Some(task) = core.running {
            core.task(task).check_stack(sp, n);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::{Builder, block_on, spawn};
    use anyhow::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_block_on_runs_entry_and_spawned_tasks() -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        let code = block_on(move || {
            for i in 0..3 {
                let l = l.clone();
                spawn(move || l.borrow_mut().push(i));
            }
            l.borrow_mut().push(100);
        })?;

        assert_eq!(code, 0);
        // Spawn never runs the child eagerly; the run queue is FIFO.
        assert_eq!(*log.borrow(), vec![100, 0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_yield_now_counts_other_tasks() -> Result<()> {
        let counts = Rc::new(RefCell::new(Vec::new()));

        let c = counts.clone();
        block_on(move || {
            c.borrow_mut().push(yield_now());
            for _ in 0..2 {
                spawn(|| {
                    yield_now();
                });
            }
            c.borrow_mut().push(yield_now());
        })?;

        // Alone: nobody ran. With two peers: both ran once.
        assert_eq!(*counts.borrow(), vec![0, 2]);
        Ok(())
    }

    #[test]
    fn test_interleaving_is_round_robin() -> Result<()> {
        let log = Rc::new(RefCell::new(String::new()));

        let l = log.clone();
        block_on(move || {
            for name in ["a", "b"] {
                let l = l.clone();
                spawn(move || {
                    for _ in 0..3 {
                        l.borrow_mut().push_str(name);
                        yield_now();
                    }
                });
            }
        })?;

        assert_eq!(*log.borrow(), "ababab");
        Ok(())
    }

    #[test]
    fn test_exit_code_of_last_task_is_returned() -> Result<()> {
        let code = block_on(|| {
            spawn(|| {
                yield_now();
                exit(7);
            });
            exit(3);
        })?;

        assert_eq!(code, 7);
        Ok(())
    }

    #[test]
    fn test_deadlock_is_reported() {
        let res = block_on(|| {
            spawn(park);
            park();
        });

        assert_eq!(res, Err(RuntimeError::Deadlock { stalled: 2 }));
    }

    #[test]
    fn test_system_task_does_not_keep_runtime_alive() -> Result<()> {
        let code = block_on(|| {
            spawn(|| {
                mark_system();
                // Blocks forever; the runtime still ends once main exits.
                park();
            });
            yield_now();
        })?;

        assert_eq!(code, 0);
        Ok(())
    }

    #[test]
    fn test_park_and_unpark() -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let parked = Rc::new(RefCell::new(None));

        let (l, p) = (log.clone(), parked.clone());
        block_on(move || {
            let (l2, p2) = (l.clone(), p.clone());
            spawn(move || {
                *p2.borrow_mut() = Some(current());
                l2.borrow_mut().push("parked");
                park();
                l2.borrow_mut().push("woken");
            });

            yield_now();
            l.borrow_mut().push("waking");
            let task = p.borrow_mut().take().expect("child parked");
            unpark(task);
        })?;

        assert_eq!(*log.borrow(), vec!["parked", "waking", "woken"]);
        Ok(())
    }

    #[test]
    fn test_names_states_and_data() -> Result<()> {
        block_on(|| {
            set_name("worker");
            set_state("busy");
            assert_eq!(name(), "worker");
            assert_eq!(state(), "busy");

            assert!(set_data(41u32).is_none());
            with_data(|n: Option<&mut u32>| *n.expect("u32 stored") += 1);
            let data = take_data().expect("data present");
            assert_eq!(data.downcast_ref::<u32>(), Some(&42));
            assert!(take_data().is_none());

            assert!(id().as_u64() >= 1);
            assert!(!any_ready());
        })?;
        Ok(())
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_task_panic_is_reraised() {
        let _ = block_on(|| {
            spawn(|| panic!("boom"));
        });
    }

    #[test]
    fn test_runtime_can_be_reused_on_same_thread() -> Result<()> {
        let rt = Builder::new().rng_seed(1).build();
        assert_eq!(rt.block_on(|| exit(5))?, 5);
        assert_eq!(rt.block_on(|| {})?, 0);
        Ok(())
    }

    #[test]
    fn test_nested_block_on_is_rejected() -> Result<()> {
        let nested = Rc::new(RefCell::new(None));

        let n = nested.clone();
        block_on(move || {
            *n.borrow_mut() = Some(block_on(|| {}));
        })?;

        assert_eq!(*nested.borrow(), Some(Err(RuntimeError::AlreadyRunning)));
        Ok(())
    }

    #[test]
    fn test_need_stack_outside_runtime_is_noop() {
        need_stack(1 << 20);
    }
}
