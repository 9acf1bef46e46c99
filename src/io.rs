//! Descriptor I/O that parks the task instead of blocking the thread.
//!
//! The descriptor must be in non-blocking mode (see [`make_nonblocking`]);
//! otherwise a read or write that cannot complete stalls every task.

use crate::runtime::{Interest, wait_fd};
use std::io;
use std::os::fd::{AsRawFd, RawFd};

fn cvt(n: isize) -> io::Result<usize> {
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn read_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // Safety: `buf` is valid for writes of `buf.len()` bytes.
    cvt(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

fn write_raw(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // Safety: `buf` is valid for reads of `buf.len()` bytes.
    cvt(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
}

/// Put `fd` into non-blocking mode.
pub fn make_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let fd = fd.as_raw_fd();

    // Safety: fcntl on a caller-owned descriptor.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Read into `buf`, parking until data (or end of file) is available.
///
/// Tries the read first and only waits if it would block.
pub fn read(fd: &impl AsRawFd, buf: &mut [u8]) -> io::Result<usize> {
    let fd = fd.as_raw_fd();
    loop {
        match read_raw(fd, buf) {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => wait_fd(fd, Interest::Read),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            res => return res,
        }
    }
}

/// Like [`read`], but always waits for readiness before the first attempt.
///
/// Lets other tasks run even when data is already buffered.
pub fn read_once(fd: &impl AsRawFd, buf: &mut [u8]) -> io::Result<usize> {
    let fd = fd.as_raw_fd();
    loop {
        wait_fd(fd, Interest::Read);
        match read_raw(fd, buf) {
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            res => return res,
        }
    }
}

/// Write all of `buf`, parking whenever the descriptor is full.
///
/// Returns the number of bytes written, which is short only if a write
/// returned 0.
pub fn write_all(fd: &impl AsRawFd, buf: &[u8]) -> io::Result<usize> {
    let fd = fd.as_raw_fd();
    let mut written = 0;

    while written < buf.len() {
        match write_raw(fd, &buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => wait_fd(fd, Interest::Write),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{block_on, spawn, yield_now};
    use anyhow::Result;
    use std::cell::RefCell;
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;

    #[test]
    fn test_read_parks_until_peer_writes() -> Result<()> {
        let (a, b) = UnixStream::pair()?;
        make_nonblocking(&a)?;
        make_nonblocking(&b)?;
        let got = Rc::new(RefCell::new(Vec::new()));

        let g = got.clone();
        block_on(move || {
            spawn(move || {
                let mut buf = [0u8; 16];
                let n = read(&b, &mut buf).expect("read");
                g.borrow_mut().extend_from_slice(&buf[..n]);
            });
            yield_now();

            assert_eq!(write_all(&a, b"hello").expect("write"), 5);
        })?;

        assert_eq!(*got.borrow(), b"hello");
        Ok(())
    }

    #[test]
    fn test_write_all_waits_for_drain() -> Result<()> {
        let (a, b) = UnixStream::pair()?;
        make_nonblocking(&a)?;
        make_nonblocking(&b)?;

        // Larger than any default socket buffer, so the writer must park.
        const LEN: usize = 4 * 1024 * 1024;
        let total = Rc::new(RefCell::new(0));

        let t = total.clone();
        block_on(move || {
            spawn(move || {
                let data = vec![7u8; LEN];
                assert_eq!(write_all(&a, &data).expect("write"), LEN);
            });

            spawn(move || {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let n = read_once(&b, &mut buf).expect("read");
                    if n == 0 {
                        break;
                    }
                    assert!(buf[..n].iter().all(|&x| x == 7));
                    *t.borrow_mut() += n;
                }
            });
        })?;

        assert_eq!(*total.borrow(), LEN);
        Ok(())
    }
}
