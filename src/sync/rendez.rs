use crate::queue::WaitQueue;
use crate::runtime::scheduler::{park, set_state};
use crate::sync::MutexGuard;
use std::cell::RefCell;
use std::fmt;

/// A condition variable: tasks sleep on it until another task wakes them.
///
/// Wake-ups are not remembered. A wake with nobody sleeping does nothing,
/// so sleepers should re-check their condition in a loop, typically under a
/// [`Mutex`](crate::sync::Mutex) passed to [`sleep_locked`](Rendez::sleep_locked).
#[derive(Default)]
pub struct Rendez {
    waiting: RefCell<WaitQueue>,
}

impl Rendez {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park the running task until woken.
    pub fn sleep(&self) {
        self.waiting.borrow_mut().push_current();
        set_state("sleep");
        park();
    }

    /// Release `guard`, park until woken, then lock the same mutex again.
    pub fn sleep_locked<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = MutexGuard::mutex(&guard);

        self.waiting.borrow_mut().push_current();
        drop(guard);
        set_state("sleep");
        park();

        mutex.lock()
    }

    /// Wake the longest sleeper. Returns how many woke (0 or 1).
    pub fn wake_one(&self) -> usize {
        usize::from(self.waiting.borrow_mut().wake_one().is_some())
    }

    /// Wake every sleeper. Returns how many woke.
    pub fn wake_all(&self) -> usize {
        self.waiting.borrow_mut().wake_all()
    }
}

impl fmt::Debug for Rendez {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendez")
            .field("waiting", &self.waiting.borrow().len())
            .finish()
    }
}
