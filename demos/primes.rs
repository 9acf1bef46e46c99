//! Prime sieve as a pipeline of tasks.
//!
//! Each task owns one prime: it forwards every number it receives that the
//! prime does not divide, and the first number to reach the end of the
//! pipeline is the next prime.
//!
//! Usage: `cargo run --example primes -- [goal] [buffer]`

use cotask::chan::Channel;
use cotask::{exit_all, spawn_builder};

const PRIME_STACK_SIZE: usize = 32 * 1024;

#[derive(Clone, Copy)]
struct Sieve {
    goal: u64,
    buffer: usize,
}

fn spawn_prime(sieve: Sieve, input: Channel<u64>) {
    spawn_builder()
        .name("prime")
        .stack_size(PRIME_STACK_SIZE)
        .spawn(move || prime_task(sieve, input));
}

fn prime_task(sieve: Sieve, input: Channel<u64>) {
    let p = input.recv();
    if p > sieve.goal {
        exit_all(0);
    }
    println!("{p}");
    cotask::runtime::set_name(format!("prime {p}"));

    let output = Channel::new(sieve.buffer);
    spawn_prime(sieve, output.clone());

    loop {
        let n = input.recv();
        if n % p != 0 {
            output.send(n);
        }
    }
}

fn main() {
    cotask::main(|args| {
        let goal = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
        let buffer = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
        println!("goal={goal}, buffer={buffer}");

        let sieve = Sieve { goal, buffer };
        let numbers = Channel::new(buffer);
        spawn_prime(sieve, numbers.clone());

        for n in 2.. {
            numbers.send(n);
        }
    })
}
