//! Single-threaded cooperative runtime.
//!
//! A [`Runtime`] takes over the calling thread: it runs an entry task and
//! every task that task spawns, switching between them only when one of them
//! blocks, yields or exits.

mod builder;
pub(crate) mod core;
mod info;
pub(crate) mod poll;
pub(crate) mod scheduler;
mod spawn;
mod timer;

pub use builder::Builder;
pub use info::dump_tasks;
pub use poll::{Interest, wait_fd};
pub use scheduler::{
    any_ready, current, exit, exit_all, id, mark_system, name, need_stack, park, set_data,
    set_name, set_state, state, take_data, unpark, with_data, yield_now,
};
pub use spawn::{SpawnBuilder, spawn, spawn_builder};
pub use timer::{sleep, sleep_for};

use crate::error::RuntimeError;
use builder::RuntimeConfig;
use scheduler::Outcome;
use std::panic;

/// Drives a set of tasks on the current thread.
#[derive(Debug, Clone)]
pub struct Runtime {
    cfg: RuntimeConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Builder::new().build()
    }
}

impl Runtime {
    pub(crate) fn from_config(cfg: RuntimeConfig) -> Self {
        Runtime { cfg }
    }

    /// Run `entry` as the task named `"main"` and keep scheduling until
    /// every non-system task has exited.
    ///
    /// Returns the exit code of the last task to exit (0 when tasks simply
    /// return). If the remaining tasks are all blocked, returns
    /// [`RuntimeError::Deadlock`]. A panic inside any task stops the runtime
    /// and is resumed on the calling thread.
    pub fn block_on<F>(&self, entry: F) -> Result<i32, RuntimeError>
    where
        F: FnOnce() + 'static,
    {
        let mut core = core::Core::new(self.cfg.clone());
        core.spawn(
            "main".to_string(),
            self.cfg.main_stack_size,
            false,
            Box::new(entry),
        );
        core::install(core)?;

        if self.cfg.info_signal {
            info::install();
        }

        tracing::debug!(cfg = ?self.cfg, "runtime start");
        let outcome = scheduler::run();

        // Tasks are dropped here, outside of the thread-local borrow, so
        // destructors that look for a runtime see none instead of aborting.
        drop(core::uninstall());

        match outcome {
            Outcome::Exited(code) => {
                tracing::debug!(code, "runtime stop");
                Ok(code)
            }
            Outcome::Deadlock(stalled) => Err(RuntimeError::Deadlock { stalled }),
            Outcome::Panicked(payload) => panic::resume_unwind(payload),
        }
    }

    /// Like [`block_on`](Runtime::block_on), but hands the process arguments
    /// to `entry` and terminates the process with the final exit code.
    ///
    /// A deadlock prints `no runnable tasks! N tasks stalled` to stderr and
    /// exits with status 1.
    pub fn run_main<F>(&self, entry: F) -> !
    where
        F: FnOnce(Vec<String>) + 'static,
    {
        let args: Vec<String> = std::env::args().collect();

        match self.block_on(move || entry(args)) {
            Ok(code) => std::process::exit(code),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1)
            }
        }
    }
}

/// Run `entry` on a default runtime. See [`Runtime::block_on`].
pub fn block_on<F>(entry: F) -> Result<i32, RuntimeError>
where
    F: FnOnce() + 'static,
{
    Runtime::default().block_on(entry)
}

/// Process entry point: run `entry(args)` as the `"main"` task with the info
/// signal enabled, then exit the process.
///
/// ```no_run
/// fn main() {
///     cotask::main(|args| {
///         println!("{} args", args.len());
///     })
/// }
/// ```
pub fn main<F>(entry: F) -> !
where
    F: FnOnce(Vec<String>) + 'static,
{
    Builder::new().info_signal(true).build().run_main(entry)
}
