//! Cooperative tasks on a single thread.
//!
//! Every task gets its own stack and runs until it blocks on a channel, a
//! lock, a sleep or a descriptor, yields, or exits; only then does the next
//! ready task run. There is no preemption and no parallelism, which is what
//! lets the synchronization types in this crate be plain `Rc`/`Cell` data.
//!
//! ```no_run
//! use cotask::chan::Channel;
//!
//! cotask::main(|_args| {
//!     let chan = Channel::new(2);
//!
//!     let tx = chan.clone();
//!     cotask::spawn(move || {
//!         for i in 1..=5 {
//!             tx.send(i);
//!         }
//!     });
//!
//!     for _ in 0..5 {
//!         println!("{}", chan.recv());
//!     }
//! })
//! ```

mod arch;
mod context;
mod error;
mod netpoll;
mod queue;
mod task;

pub mod chan;
pub mod io;
pub mod runtime;
pub mod sync;

pub use error::{RuntimeError, TryRecvError, TrySendError, WouldBlock};
pub use runtime::{
    Builder, Interest, Runtime, block_on, current, exit, exit_all, id, main, sleep, sleep_for,
    spawn, spawn_builder, wait_fd, yield_now,
};
pub use task::{RunState, STACK_SIZE, TaskId, TaskRef};
