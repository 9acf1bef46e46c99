//! Task-level locks and a condition variable.
//!
//! These block the calling task, never the thread. Ownership is tracked per
//! task; releasing a lock the running task does not hold aborts the process.

mod mutex;
mod rendez;
mod rwlock;

pub use mutex::{Mutex, MutexGuard};
pub use rendez::Rendez;
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
