//! Task table diagnostics.

use crate::runtime::core::with_core;
use std::io::{self, Write};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set from the signal handler, consumed by the dispatch loop.
static DUMP_REQUESTED: AtomicBool = AtomicBool::new(false);

static INSTALL: Once = Once::new();

/// Write the table of every task to `w`.
///
/// Each row carries the task id (suffixed with `s` for system tasks), its
/// name, its state text and whether it is running, ready or blocked.
pub fn dump_tasks(w: &mut impl Write) -> io::Result<()> {
    with_core(|core| core.write_table(w))
}

extern "C" fn on_info_signal(_: libc::c_int) {
    DUMP_REQUESTED.store(true, Ordering::Relaxed);
}

/// Route SIGQUIT (and SIGINFO where it exists) to a table dump on stderr.
pub(crate) fn install() {
    INSTALL.call_once(|| {
        install_handler(libc::SIGQUIT);
        #[cfg(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd"
        ))]
        install_handler(libc::SIGINFO);
    });
}

fn install_handler(signal: libc::c_int) {
    // Safety: the handler only stores to an atomic.
    let ret = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_info_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal, &action, std::ptr::null_mut())
    };

    if ret < 0 {
        tracing::warn!(signal, err = %io::Error::last_os_error(), "sigaction failed");
    }
}

/// Whether a dump was requested since the last call.
pub(crate) fn take_request() -> bool {
    DUMP_REQUESTED.swap(false, Ordering::Relaxed)
}
