//! Many tasks sleeping at once on one thread.
//!
//! Every task sleeps for the same duration; they all wake together, so the
//! whole run takes about one sleep rather than one per task.

use cotask::{sleep, spawn_builder};
use std::time::{Duration, Instant};

const NUM_TASKS: usize = 10;
const SLEEP_MS: u64 = 100;

fn main() -> anyhow::Result<()> {
    println!("=== cotask sleep demo ===\n");
    println!("{NUM_TASKS} tasks sleeping {SLEEP_MS}ms each on one thread\n");

    let start = Instant::now();

    cotask::block_on(move || {
        for i in 0..NUM_TASKS {
            spawn_builder().name(format!("sleeper {i}")).spawn(move || {
                println!(
                    "[{:>6.3}s] Task {} starting sleep",
                    start.elapsed().as_secs_f64(),
                    i
                );

                let slept = sleep(Duration::from_millis(SLEEP_MS));

                println!(
                    "[{:>6.3}s] Task {} woke up after {:?}",
                    start.elapsed().as_secs_f64(),
                    i,
                    slept
                );
            });
        }
    })?;

    println!("\nTotal elapsed: {:?}", start.elapsed());
    println!("Sequential sleeps would take ~{}ms", NUM_TASKS as u64 * SLEEP_MS);
    Ok(())
}
