//! Chunked, non-blocking reads and writes over a raw pipe fd.
//!
//! Every pipe the runtime owns is driven through tokio's reactor via
//! [`tokio::io::unix::AsyncFd`], which registers readiness interest for a
//! fd without taking ownership of it. Data moves in fixed-size chunks so a
//! 256 KiB `feed` or a multi-megabyte captured stdout never requires a
//! buffer sized to the whole payload at once on the syscall side. Both
//! `write_all` and `read_to_end` close the fd once their loop reaches
//! completion (success or error), signaling EOF to whatever is on the
//! other end — `write_all` through the fd's own idempotent `OwnedFd::close`
//! since the runtime's cleanup path may hold another clone of the same
//! handle, `read_to_end` through a raw close since the capture pipe's read
//! end is never shared.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use tokio::io::unix::AsyncFd;

use crate::chunk;
use crate::ir::Data;
use crate::posix;

/// Chunk size for pipe reads and writes. Matches a typical pipe buffer
/// size, so a single readable/writable wakeup can usually drain or fill the
/// kernel buffer in one syscall.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

struct BorrowedFd(RawFd);

impl AsRawFd for BorrowedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Writes one chunk to `fd` in full, handling partial writes by resuming
/// at the byte offset and suspending on `EAGAIN` via [`AsyncFd::writable`].
async fn write_chunk(async_fd: &AsyncFd<BorrowedFd>, mut chunk: &[u8]) -> io::Result<()> {
    while !chunk.is_empty() {
        let mut guard = async_fd.writable().await?;
        let result = guard.try_io(|inner| {
            let n = unsafe {
                libc::write(
                    inner.as_raw_fd(),
                    chunk.as_ptr() as *const libc::c_void,
                    chunk.len(),
                )
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });
        match result {
            Ok(Ok(n)) => chunk = &chunk[n..],
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

/// Writes `data` to `fd` in full, streamed through [`chunk::iterencode`] so
/// a large payload is never buffered as a single `CHUNK_SIZE`-spanning
/// write, then closes `fd` to signal EOF to the reader. Closes `fd` on
/// error too, so a write failure never leaves the pipe half-open.
///
/// Closing goes through `fd`'s own idempotent [`OwnedFd::close`], not a raw
/// `libc::close`: this is the fd the runtime's cleanup path also holds a
/// handle to, and the two must agree on whether it's still open.
pub(crate) async fn write_all(fd: &crate::ownedfd::OwnedFd, data: &Data) -> io::Result<()> {
    let result = write_all_inner(fd.raw(), data).await;
    fd.close();
    result
}

async fn write_all_inner(fd: RawFd, data: &Data) -> io::Result<()> {
    posix::set_nonblocking(fd)?;
    let async_fd = AsyncFd::new(BorrowedFd(fd))?;
    for piece in chunk::iterencode(data, CHUNK_SIZE) {
        write_chunk(&async_fd, piece).await?;
    }
    Ok(())
}

/// Reads `fd` to exhaustion (EOF), chunked to [`CHUNK_SIZE`] per syscall,
/// then closes `fd`. Used to capture a command's stdout for
/// [`crate::runtime::out`].
pub(crate) async fn read_to_end(fd: RawFd) -> io::Result<Vec<u8>> {
    let result = read_to_end_inner(fd).await;
    unsafe {
        libc::close(fd);
    }
    result
}

async fn read_to_end_inner(fd: RawFd) -> io::Result<Vec<u8>> {
    posix::set_nonblocking(fd)?;
    let async_fd = AsyncFd::new(BorrowedFd(fd))?;
    let mut out = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let mut guard = async_fd.readable().await?;
        let result = guard.try_io(|inner| {
            let n = unsafe {
                libc::read(
                    inner.as_raw_fd(),
                    chunk.as_mut_ptr() as *mut libc::c_void,
                    chunk.len(),
                )
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });
        match result {
            Ok(Ok(0)) => return Ok(out),
            Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
}
