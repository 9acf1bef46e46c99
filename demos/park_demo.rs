//! Park and unpark without any I/O.
//!
//! A few tasks park themselves; a waker task sleeps, then readies each of
//! them in turn.

use cotask::runtime::{current, park, unpark};
use cotask::{TaskRef, sleep, spawn};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    println!("=== cotask park/unpark demo ===\n");

    let start = Instant::now();

    cotask::block_on(move || {
        let parked: Rc<RefCell<Vec<TaskRef>>> = Rc::default();

        for i in 0..4 {
            let parked = parked.clone();
            spawn(move || {
                println!(
                    "[{:>6.3}s] Task {} started, will park",
                    start.elapsed().as_secs_f64(),
                    i
                );

                parked.borrow_mut().push(current());
                park();

                println!(
                    "[{:>6.3}s] Task {} woke up!",
                    start.elapsed().as_secs_f64(),
                    i
                );
            });
        }

        spawn(move || {
            println!(
                "[{:>6.3}s] Waker task: sleeping 500ms then waking parked tasks",
                start.elapsed().as_secs_f64()
            );
            sleep(Duration::from_millis(500));

            let tasks = parked.take();
            println!(
                "[{:>6.3}s] Waker task: waking {} tasks",
                start.elapsed().as_secs_f64(),
                tasks.len()
            );
            for task in tasks {
                unpark(task);
            }
        });
    })?;

    println!("\nTotal elapsed: {:?}", start.elapsed());
    Ok(())
}
