//! Thin, async-signal-safety-aware wrappers around the POSIX primitives the
//! runtime needs: pipe allocation, non-blocking mode, and the handful of
//! calls ([`exec_ops`]) that are safe to make between `fork` and `exec`.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use crate::fdops::Op;

/// Allocates a pipe. Both ends are created close-on-exec: a fd the runtime
/// allocates is invisible across `exec` in any child unless that child's
/// own `Op` list explicitly `dup2`s it onto a target (which clears
/// close-on-exec on the target per POSIX `dup2` semantics). This is what
/// gives every spawned child exactly its declared inherited-fd set without
/// a "close everything else" pass.
pub fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Puts `fd` into non-blocking mode, required before handing it to the
/// async I/O layer (§4.4).
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Converts a path to NUL-terminated bytes suitable for a raw `open(2)`
/// call from inside [`exec_ops`] (pre-encoded at `Op` construction time so
/// the child never has to allocate).
pub fn path_to_nul_terminated(path: &Path) -> io::Result<Vec<u8>> {
    CString::new(path.as_os_str().as_bytes())
        .map(|c| c.into_bytes_with_nul())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

/// Resets `SIGPIPE` to its default disposition in the child. Rust's runtime
/// sets `SIGPIPE` to `SIG_IGN` at process startup for historical porting
/// reasons. Quoting `std::process::Command::do_exec`'s own rationale for
/// doing the same: libstd ignores SIGPIPE, and a forked child inherits that
/// disposition unless it is reset, which would make a pipeline head that
/// writes past a reader that already exited survive instead of
/// terminating the way every other POSIX program expects.
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

/// Executes an `Op` list between `fork` and `exec`, using only
/// async-signal-safe primitives (`open`, `dup2`, `close`; no allocation, no
/// locking). Intended to run inside a
/// [`std::os::unix::process::CommandExt::pre_exec`] closure.
///
/// # Safety
///
/// Must only be called in a single-threaded child between `fork` and
/// `exec`, i.e. from a `pre_exec` closure. `Op::Open` paths must already be
/// NUL-terminated byte buffers (see [`path_to_nul_terminated`]) so no
/// allocation is needed here.
pub unsafe fn exec_ops(ops: &[Op]) -> io::Result<()> {
    reset_sigpipe();
    for op in ops {
        match op {
            Op::Open { fd, path, flags } => {
                let opened =
                    unsafe { libc::open(path.as_ptr() as *const libc::c_char, *flags, 0o644) };
                if opened < 0 {
                    return Err(io::Error::last_os_error());
                }
                if opened != *fd {
                    if unsafe { libc::dup2(opened, *fd) } < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if unsafe { libc::close(opened) } < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
            }
            Op::Dup2 { src, dst } => {
                if unsafe { libc::dup2(*src, *dst) } < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Op::Close { fd } => {
                if unsafe { libc::close(*fd) } < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::EBADF) {
                        return Err(err);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Sends `signal` to `pid`. Ignores `ESRCH` (already reaped) so cleanup
/// racing against a naturally-exiting child is not an error.
pub fn kill(pid: libc::pid_t, signal: i32) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid, signal) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}
