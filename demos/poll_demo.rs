//! TCP echo over descriptor readiness.
//!
//! An echo server task and several client tasks share one thread. Every
//! socket is non-blocking; a task that would block parks until the readiness
//! loop reports its descriptor.

use cotask::io::{make_nonblocking, read, write_all};
use cotask::runtime::mark_system;
use cotask::{Interest, sleep, spawn, spawn_builder, wait_fd};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

const NUM_CLIENTS: usize = 8;

fn serve(listener: TcpListener, start: Instant) -> io::Result<()> {
    mark_system();
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                wait_fd(listener.as_raw_fd(), Interest::Read);
                continue;
            }
            Err(err) => return Err(err),
        };
        make_nonblocking(&stream)?;

        spawn(move || {
            // Simulate a slow server without holding up the thread.
            sleep(Duration::from_millis(100));

            let mut buf = [0u8; 64];
            let res = read(&stream, &mut buf).and_then(|n| write_all(&stream, &buf[..n]));
            if let Err(err) = res {
                eprintln!(
                    "[{:>6.3}s] echo to {} failed: {}",
                    start.elapsed().as_secs_f64(),
                    peer,
                    err
                );
            }
        });
    }
}

fn client(addr: SocketAddr, i: usize, start: Instant) -> io::Result<String> {
    let stream = TcpStream::connect(addr)?;
    make_nonblocking(&stream)?;

    let msg = format!("Hello from task {i}");
    write_all(&stream, msg.as_bytes())?;

    let mut buf = [0u8; 64];
    let n = read(&stream, &mut buf)?;
    println!(
        "[{:>6.3}s] Task {} received after {:?}",
        start.elapsed().as_secs_f64(),
        i,
        start.elapsed()
    );
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

fn main() -> anyhow::Result<()> {
    println!("=== cotask TCP echo demo ===\n");

    let listener = TcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    println!("Echo server listening on {addr}\n");

    let start = Instant::now();

    cotask::block_on(move || {
        spawn_builder().name("server").spawn(move || {
            if let Err(err) = serve(listener, start) {
                eprintln!("server failed: {err}");
            }
        });

        for i in 0..NUM_CLIENTS {
            spawn_builder()
                .name(format!("client {i}"))
                .spawn(move || match client(addr, i, start) {
                    Ok(reply) => println!("Task {i} got {reply:?}"),
                    Err(err) => eprintln!("Task {i} failed: {err}"),
                });
        }
    })?;

    println!("\nTotal elapsed: {:?}", start.elapsed());
    println!("Expected: ~100ms (all echoes are served concurrently)");
    Ok(())
}
