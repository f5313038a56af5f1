//! A runtime-owned fd with an idempotent close.
//!
//! §4.5 of the design describes an `OwnedFd` state machine: `Allocated` →
//! (`Inherited` | `DataPending`) → `Closed`, with `Closed` idempotent. Rust's
//! ownership model already distinguishes "who holds the handle" structurally
//! (the cleanup list holds one clone, a data-writer task holds another), so
//! the only state this type needs to track at runtime is open-vs-closed; it
//! does so with a flag shared across every clone, so whichever side closes
//! first wins and the other's close is a documented no-op.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A runtime-owned raw fd. Cloning an `OwnedFd` does not duplicate the
/// underlying fd (no `dup`); it shares ownership of the *same* fd so either
/// clone can close it safely. This is how a fd allocated by the runtime's
/// flat fd list is handed to a concurrent data-writer task: both the list's
/// entry and the writer's handle are clones of one `OwnedFd`.
#[derive(Debug, Clone)]
pub struct OwnedFd {
    fd: RawFd,
    closed: Arc<AtomicBool>,
}

impl OwnedFd {
    /// Takes ownership of a freshly allocated fd (from `pipe()` or `open()`).
    pub fn new(fd: RawFd) -> Self {
        OwnedFd {
            fd,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The raw fd number. Remains valid (if unclosed) for the lifetime of
    /// any clone of this handle.
    pub fn raw(&self) -> RawFd {
        self.fd
    }

    /// Whether this fd (or a clone sharing its state) has already been
    /// closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the fd, unless this handle or a clone sharing its state has
    /// already done so. Safe to call from multiple clones, in any order,
    /// any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: the swap above guarantees exactly one clone of this
        // handle reaches here, so `fd` has not yet been closed, and
        // `OwnedFd` is the sole owner of the underlying resource.
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl Drop for OwnedFd {
    fn drop(&mut self) {
        // Defensive: a handle abandoned without an explicit close (e.g. on
        // an early-return error path before registration) must not leak.
        // If another clone already closed it, this is a no-op.
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (OwnedFd::new(fds[0]), OwnedFd::new(fds[1]))
    }

    #[test]
    fn close_is_idempotent() {
        let (read_fd, _write_fd) = make_pipe();
        read_fd.close();
        assert!(read_fd.is_closed());
        // second close must not double-close the same raw fd number
        read_fd.close();
    }

    #[test]
    fn clones_share_closed_state() {
        let (read_fd, _write_fd) = make_pipe();
        let writer_handle = read_fd.clone();
        writer_handle.close();
        assert!(read_fd.is_closed());
        // closing again via the other clone is a documented no-op
        read_fd.close();
    }

    #[test]
    fn drop_closes_unclosed_fd() {
        let (read_fd, _write_fd) = make_pipe();
        let raw = read_fd.raw();
        drop(read_fd);
        // fd is now closed; attempting fcntl on it should fail with EBADF
        let rc = unsafe { libc::fcntl(raw, libc::F_GETFD) };
        assert_eq!(rc, -1);
    }
}
