use crate::error::fatal;
use crate::queue::WaitQueue;
use crate::runtime::scheduler::{current, park, set_state};
use crate::task::TaskRef;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A mutual exclusion lock that parks the task waiting for it.
///
/// Waiters are served in FIFO order. On release the lock is handed directly
/// to the first waiter, which owns it by the time it resumes, so a task that
/// releases and immediately re-locks cannot barge ahead of it.
pub struct Mutex<T: ?Sized> {
    owner: Cell<Option<TaskRef>>,
    waiting: RefCell<WaitQueue>,
    data: UnsafeCell<T>,
}

/// Holds a [`Mutex`] locked. Dropping it releases the lock.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            owner: Cell::new(None),
            waiting: RefCell::new(WaitQueue::new()),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Lock, parking until the lock is available.
    ///
    /// Locking a mutex the running task already holds aborts: it could
    /// never be released.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let me = current();

        match self.owner.get() {
            None => {
                self.owner.set(Some(me));
                return MutexGuard { mutex: self };
            }
            Some(owner) if owner == me => {
                fatal(format_args!("task {} locked a mutex it already holds", me.id()));
            }
            Some(_) => {}
        }

        self.waiting.borrow_mut().push_current();
        set_state("qlock");
        park();

        if self.owner.get() != Some(me) {
            fatal(format_args!(
                "qlock: task {} woken without owning the lock",
                me.id()
            ));
        }
        MutexGuard { mutex: self }
    }

    /// Lock if nobody holds the lock.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.owner.get().is_some() {
            return None;
        }

        self.owner.set(Some(current()));
        Some(MutexGuard { mutex: self })
    }

    pub fn is_locked(&self) -> bool {
        self.owner.get().is_some()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        let me = current();
        if self.owner.get() != Some(me) {
            fatal(format_args!(
                "qunlock: task {} does not own the lock (owner {:?})",
                me.id(),
                self.owner.get().map(|t| t.id())
            ));
        }

        let next = self.waiting.borrow_mut().wake_one();
        self.owner.set(next);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("owner", &self.owner.get().map(|t| t.id()))
            .field("waiting", &self.waiting.borrow().len())
            .finish_non_exhaustive()
    }
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// The mutex this guard holds. Kept alive by the guard's lifetime, so a
    /// `Rendez` can release and re-acquire it.
    pub(crate) fn mutex(guard: &Self) -> &'a Mutex<T> {
        guard.mutex
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: only the owning guard exists while the lock is held, and
        // tasks never run concurrently.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: see `deref`.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
