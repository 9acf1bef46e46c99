use crate::runtime::Runtime;
use crate::task::{MAIN_STACK_SIZE, STACK_SIZE};

/// Smallest stack a task may be given. Below this, a single panic message
/// can run off the end.
const MIN_STACK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    /// Stack reserved for the entry task.
    pub(crate) main_stack_size: usize,

    /// Stack for tasks spawned without an explicit size.
    pub(crate) stack_size: usize,

    /// Seed for alt tie-breaking. Random when `None`.
    pub(crate) rng_seed: Option<u64>,

    /// Print the task table on SIGQUIT (and SIGINFO where available).
    pub(crate) info_signal: bool,
}

/// Configures and creates a [`Runtime`].
///
/// ```no_run
/// let code = cotask::runtime::Builder::new()
///     .main_stack_size(512 * 1024)
///     .rng_seed(42)
///     .build()
///     .block_on(|| {
///         cotask::spawn(|| println!("hello"));
///     })
///     .unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Builder {
    main_stack_size: usize,
    stack_size: usize,
    rng_seed: Option<u64>,
    info_signal: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            main_stack_size: MAIN_STACK_SIZE,
            stack_size: STACK_SIZE,
            rng_seed: None,
            info_signal: false,
        }
    }

    /// Sets the stack size (in bytes) of the entry task.
    ///
    /// Defaults to 256 KiB.
    ///
    /// # Panics
    ///
    /// Panics if `val` is smaller than 16 KiB.
    pub fn main_stack_size(&mut self, val: usize) -> &mut Self {
        assert!(val >= MIN_STACK_SIZE, "main stack size must be at least 16 KiB");
        self.main_stack_size = val;
        self
    }

    /// Sets the stack size (in bytes) used by [`spawn`](crate::spawn).
    ///
    /// Defaults to 128 KiB. Individual tasks can override it through
    /// [`SpawnBuilder::stack_size`](crate::runtime::SpawnBuilder::stack_size).
    ///
    /// # Panics
    ///
    /// Panics if `val` is smaller than 16 KiB.
    pub fn stack_size(&mut self, val: usize) -> &mut Self {
        assert!(val >= MIN_STACK_SIZE, "stack size must be at least 16 KiB");
        self.stack_size = val;
        self
    }

    /// Seeds the generator used to break ties between executable alt arms
    /// and between pending partners. Runs with the same seed and the same
    /// program make the same choices.
    pub fn rng_seed(&mut self, seed: u64) -> &mut Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Print the task table to stderr when the process receives SIGQUIT (or
    /// SIGINFO on platforms that have it).
    pub fn info_signal(&mut self, enabled: bool) -> &mut Self {
        self.info_signal = enabled;
        self
    }

    pub(crate) fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            main_stack_size: self.main_stack_size,
            stack_size: self.stack_size,
            rng_seed: self.rng_seed,
            info_signal: self.info_signal,
        }
    }

    /// Creates the configured `Runtime`.
    pub fn build(&mut self) -> Runtime {
        Runtime::from_config(self.config())
    }
}
