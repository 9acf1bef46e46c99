use crate::error::fatal;
use crate::queue::WaitQueue;
use crate::runtime::scheduler::{current, park, set_state};
use crate::task::TaskRef;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A reader-writer lock with writer preference.
///
/// A reader only gets in while no writer holds the lock and none is
/// waiting. Releasing the write lock admits every waiting reader at once;
/// only when there are none does the next writer get the lock. The last
/// reader out hands the lock to the first waiting writer.
pub struct RwLock<T: ?Sized> {
    readers: Cell<usize>,
    writer: Cell<Option<TaskRef>>,
    rwaiting: RefCell<WaitQueue>,
    wwaiting: RefCell<WaitQueue>,
    data: UnsafeCell<T>,
}

#[must_use = "if unused the RwLock will immediately unlock"]
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

#[must_use = "if unused the RwLock will immediately unlock"]
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        RwLock {
            readers: Cell::new(0),
            writer: Cell::new(None),
            rwaiting: RefCell::new(WaitQueue::new()),
            wwaiting: RefCell::new(WaitQueue::new()),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    fn can_read(&self) -> bool {
        self.writer.get().is_none() && self.wwaiting.borrow().is_empty()
    }

    fn can_write(&self) -> bool {
        self.writer.get().is_none() && self.readers.get() == 0
    }

    /// Take a shared lock, parking while a writer holds or waits for it.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        if self.can_read() {
            self.readers.set(self.readers.get() + 1);
            return RwLockReadGuard { lock: self };
        }

        self.rwaiting.borrow_mut().push_current();
        set_state("rlock");
        park();

        // The releasing writer counted us in.
        if self.writer.get().is_some() || self.readers.get() == 0 {
            fatal("rlock: reader woken while not admitted");
        }
        RwLockReadGuard { lock: self }
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        if !self.can_read() {
            return None;
        }

        self.readers.set(self.readers.get() + 1);
        Some(RwLockReadGuard { lock: self })
    }

    /// Take the exclusive lock, parking while anyone holds it.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let me = current();
        if self.can_write() {
            self.writer.set(Some(me));
            return RwLockWriteGuard { lock: self };
        }

        self.wwaiting.borrow_mut().push_current();
        set_state("wlock");
        park();

        if self.writer.get() != Some(me) {
            fatal(format_args!("wlock: task {} woken without the lock", me.id()));
        }
        RwLockWriteGuard { lock: self }
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        if !self.can_write() {
            return None;
        }

        self.writer.set(Some(current()));
        Some(RwLockWriteGuard { lock: self })
    }

    /// Number of tasks holding a shared lock.
    pub fn reader_count(&self) -> usize {
        self.readers.get()
    }

    pub fn is_write_locked(&self) -> bool {
        self.writer.get().is_some()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn read_unlock(&self) {
        let readers = match self.readers.get() {
            0 => fatal("runlock: not locked"),
            n => n - 1,
        };
        self.readers.set(readers);

        if readers == 0 {
            let next = self.wwaiting.borrow_mut().wake_one();
            if next.is_some() {
                self.writer.set(next);
            }
        }
    }

    fn write_unlock(&self) {
        let me = current();
        match self.writer.get() {
            None => fatal("wunlock: not locked"),
            Some(writer) if writer != me => fatal(format_args!(
                "wunlock: task {} does not hold the lock (writer {})",
                me.id(),
                writer.id()
            )),
            Some(_) => {}
        }
        self.writer.set(None);

        if self.readers.get() != 0 {
            fatal("wunlock: readers");
        }

        let admitted = self.rwaiting.borrow_mut().wake_all();
        self.readers.set(admitted);

        if admitted == 0 {
            let next = self.wwaiting.borrow_mut().wake_one();
            self.writer.set(next);
        }
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        RwLock::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("readers", &self.readers.get())
            .field("writer", &self.writer.get().map(|t| t.id()))
            .field("rwaiting", &self.rwaiting.borrow().len())
            .field("wwaiting", &self.wwaiting.borrow().len())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: no writer exists while any read guard is alive.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the write guard is the only guard while it is alive.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: see `deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{block_on, spawn, yield_now};
    use anyhow::Result;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn reader(lock: &Rc<RwLock<u32>>, log: &Log, name: &'static str) {
        let (lock, log) = (lock.clone(), log.clone());
        spawn(move || {
            let guard = lock.read();
            log.borrow_mut().push(format!("{name} read {}", *guard));
            yield_now();
            log.borrow_mut().push(format!("{name} done"));
        });
    }

    fn writer(lock: &Rc<RwLock<u32>>, log: &Log, name: &'static str, value: u32) {
        let (lock, log) = (lock.clone(), log.clone());
        spawn(move || {
            let mut guard = lock.write();
            *guard = value;
            log.borrow_mut().push(format!("{name} wrote {value}"));
            yield_now();
        });
    }

    #[test]
    fn test_writer_release_admits_all_readers_together() -> Result<()> {
        let log: Log = Rc::default();

        let l = log.clone();
        block_on(move || {
            let lock = Rc::new(RwLock::new(0));
            let guard = lock.write();

            reader(&lock, &l, "r1");
            reader(&lock, &l, "r2");
            yield_now();
            writer(&lock, &l, "w2", 2);
            yield_now();

            drop(guard);
            // Both readers are in; the waiting writer is not.
            assert_eq!(lock.reader_count(), 2);
            assert!(!lock.is_write_locked());
            assert!(lock.try_read().is_none());
        })?;

        assert_eq!(
            *log.borrow(),
            vec!["r1 read 0", "r2 read 0", "r1 done", "r2 done", "w2 wrote 2"]
        );
        Ok(())
    }

    #[test]
    fn test_last_reader_promotes_one_writer() -> Result<()> {
        let log: Log = Rc::default();

        let l = log.clone();
        block_on(move || {
            let lock = Rc::new(RwLock::new(0));
            let guard = lock.read();

            writer(&lock, &l, "w1", 1);
            writer(&lock, &l, "w2", 2);
            yield_now();

            // A writer is waiting, so new readers are turned away.
            assert!(lock.try_read().is_none());

            drop(guard);
            assert!(lock.is_write_locked());
            assert_eq!(lock.reader_count(), 0);
        })?;

        assert_eq!(*log.borrow(), vec!["w1 wrote 1", "w2 wrote 2"]);
        Ok(())
    }

    #[test]
    fn test_readers_share() -> Result<()> {
        block_on(|| {
            let lock = RwLock::new(7);
            let a = lock.read();
            let b = lock.try_read().expect("shared");
            assert_eq!(*a + *b, 14);
            assert_eq!(lock.reader_count(), 2);
            assert!(lock.try_write().is_none());

            drop((a, b));
            let mut w = lock.try_write().expect("no readers left");
            *w += 1;
            assert!(lock.try_read().is_none());
        })?;
        Ok(())
    }

    #[test]
    fn test_write_unlock_by_other_task_aborts() {
        crate::error::assert_fatal(
            concat!(module_path!(), "::test_write_unlock_by_other_task_aborts"),
            "does not hold the lock",
            || {
                let lock: &'static RwLock<u32> = Box::leak(Box::new(RwLock::new(0)));
                let held = Rc::new(RefCell::new(None));

                let _ = block_on(move || {
                    *held.borrow_mut() = Some(lock.write());
                    spawn(move || drop(held.borrow_mut().take()));
                    yield_now();
                });
            },
        );
    }
}
