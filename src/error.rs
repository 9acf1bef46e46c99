use std::fmt;

/// Errors reported by [`Runtime::block_on`](crate::runtime::Runtime::block_on).
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// Live tasks remain but none of them can run.
    #[error("no runnable tasks! {stalled} tasks stalled")]
    Deadlock { stalled: usize },

    /// A runtime is already driving tasks on this thread.
    #[error("a cotask runtime is already running on this thread")]
    AlreadyRunning,
}

/// A non-blocking alt found no executable arm.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation would block")]
pub struct WouldBlock;

/// Returned by [`Channel::try_send`](crate::chan::Channel::try_send). The
/// value that could not be sent is handed back.
#[derive(thiserror::Error, PartialEq, Eq)]
pub enum TrySendError<T> {
    #[error("sending on a full channel")]
    WouldBlock(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::WouldBlock(v) => v,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::WouldBlock(_) => f.write_str("WouldBlock(..)"),
        }
    }
}

/// Returned by [`Channel::try_recv`](crate::chan::Channel::try_recv).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("receiving on an empty channel")]
    WouldBlock,
}

/// Report a violated runtime invariant and abort the process.
///
/// Used for usage errors (unlock without ownership, double enqueue, stack
/// overflow, ...) and resource exhaustion. Continuing after any of these
/// would leave the wait queues in an unknown state.
#[cold]
#[track_caller]
pub(crate) fn fatal(msg: impl fmt::Display) -> ! {
    tracing::error!(%msg, "fatal runtime error");
    eprintln!("cotask: {msg}");
    std::process::abort()
}

/// Run `case` in a child test process and check that it dies through
/// [`fatal`] with a message containing `message`.
///
/// `test` is the calling test's path as `module_path!()` spells it. The child
/// re-runs only that test with `COTASK_FATAL_CASE` set, which makes this
/// function call `case` instead of spawning again.
#[cfg(test)]
#[track_caller]
pub(crate) fn assert_fatal(test: &str, message: &str, case: impl FnOnce()) {
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    const FATAL_CASE: &str = "COTASK_FATAL_CASE";

    let name = test.split_once("::").map_or(test, |(_, rest)| rest);
    if std::env::var(FATAL_CASE).as_deref() == Ok(name) {
        case();
        // Reaching here means no abort: exit cleanly so the parent fails.
        std::process::exit(0);
    }

    let exe = std::env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args([name, "--exact", "--nocapture", "--test-threads=1"])
        .env(FATAL_CASE, name)
        .output()
        .expect("spawn test binary");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "{name} did not abort: {:?}\n{stderr}",
        output.status
    );
    assert!(
        stderr
            .lines()
            .any(|l| l.starts_with("cotask: ") && l.contains(message)),
        "{name} aborted without `{message}`:\n{stderr}"
    );
}
