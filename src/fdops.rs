//! Fd-table simulator: builds an ordered op list and tracks the child's
//! live fd set. Pure data — no syscalls happen here. The runtime's
//! `pre_exec` hook (see [`crate::spawn`]) interprets the emitted [`Op`]
//! list into real syscalls between fork and exec.

use std::collections::BTreeSet;

/// One async-signal-safe child-side operation. Order is significant: each
/// op executes observing the effects of all prior ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `open(path, flags, 0o644)`, then move the result onto `fd`.
    Open { fd: i32, path: Vec<u8>, flags: i32 },
    /// `dup2(src, dst)`.
    Dup2 { src: i32, dst: i32 },
    /// `close(fd)`.
    Close { fd: i32 },
}

/// Raised when a redirect refers to a source fd that isn't live. Surfaced
/// at IR-translation time, before any process is spawned — never at
/// child-execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dup2 source fd {0} is not live")]
pub struct NotLive(pub i32);

/// Simulates the child's fd table across a command's redirect list.
///
/// Constructed with the set of fds the spawn layer will already have wired
/// live before this command's own `Op`s run (typically `{0, 1, 2}` plus any
/// outer pipeline pipe ends). `dup2` against a source outside the live set
/// is a programmer error, reported immediately rather than deferred to the
/// child.
#[derive(Debug, Clone, Default)]
pub struct FdOps {
    ops: Vec<Op>,
    live: BTreeSet<i32>,
}

impl FdOps {
    /// Creates a simulator seeded with the given live fds.
    pub fn new(live: impl IntoIterator<Item = i32>) -> Self {
        FdOps {
            ops: Vec::new(),
            live: live.into_iter().collect(),
        }
    }

    /// Declares `fd` already open in the forthcoming child. Emits no op.
    pub fn add_live(&mut self, fd: i32) {
        self.live.insert(fd);
    }

    /// Emits `Open { fd, path, flags }`; `fd` becomes live.
    pub fn open(&mut self, fd: i32, path: Vec<u8>, flags: i32) {
        self.ops.push(Op::Open { fd, path, flags });
        self.live.insert(fd);
    }

    /// Emits `Dup2 { src, dst }`. Fails if `src` is not live. `dst` becomes
    /// live; `src` stays live.
    pub fn dup2(&mut self, src: i32, dst: i32) -> Result<(), NotLive> {
        if !self.live.contains(&src) {
            return Err(NotLive(src));
        }
        self.ops.push(Op::Dup2 { src, dst });
        self.live.insert(dst);
        Ok(())
    }

    /// `dup2(src, dst)` followed by `close(src)`. Used to wire a pipe end
    /// onto its target fd.
    pub fn move_fd(&mut self, src: i32, dst: i32) -> Result<(), NotLive> {
        self.dup2(src, dst)?;
        self.close(src);
        Ok(())
    }

    /// Emits `Close { fd }`; `fd` leaves the live set.
    pub fn close(&mut self, fd: i32) {
        self.ops.push(Op::Close { fd });
        self.live.remove(&fd);
    }

    /// The ordered operations for the child.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// The fds alive in the child after all ops have run.
    pub fn live_fds(&self) -> &BTreeSet<i32> {
        &self.live
    }

    /// All live fds, sorted — the candidate inherited-fd set. The caller
    /// (the spawn layer) decides which of these, if any beyond 0/1/2, must
    /// be explicitly preserved across exec.
    pub fn keep_fds(&self) -> Vec<i32> {
        self.live.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dup2_against_non_live_source_fails() {
        let mut fdops = FdOps::new([0, 1, 2]);
        assert_eq!(fdops.dup2(5, 1), Err(NotLive(5)));
    }

    #[test]
    fn dup2_seeded_with_stderr_succeeds() {
        // Models `2>&1`: fd 2 is live by convention even if the caller
        // never explicitly declared it.
        let mut fdops = FdOps::new([0, 1, 2]);
        fdops.dup2(2, 1).unwrap();
        assert!(fdops.live_fds().contains(&1));
        assert!(fdops.live_fds().contains(&2));
    }

    #[test]
    fn move_fd_closes_source() {
        let mut fdops = FdOps::new([0, 1, 2]);
        fdops.add_live(7);
        fdops.move_fd(7, 0).unwrap();
        assert!(!fdops.live_fds().contains(&7));
        assert!(fdops.live_fds().contains(&0));
        assert_eq!(
            fdops.ops(),
            &[Op::Dup2 { src: 7, dst: 0 }, Op::Close { fd: 7 }]
        );
    }

    #[test]
    fn open_then_close_reflects_in_live_set() {
        let mut fdops = FdOps::new([0, 1, 2]);
        fdops.open(3, b"/tmp/f".to_vec(), libc::O_WRONLY);
        assert!(fdops.live_fds().contains(&3));
        fdops.close(3);
        assert!(!fdops.live_fds().contains(&3));
    }

    #[test]
    fn live_fds_matches_replaying_ops_in_order() {
        let mut fdops = FdOps::new([0, 1, 2]);
        fdops.open(3, b"/tmp/a".to_vec(), libc::O_RDONLY);
        fdops.dup2(3, 0).unwrap();
        fdops.close(3);

        // Replay the emitted ops against a fresh fd set and confirm it
        // matches the simulator's own bookkeeping.
        let mut replay: BTreeSet<i32> = [0, 1, 2].into_iter().collect();
        for op in fdops.ops() {
            match *op {
                Op::Open { fd, .. } => {
                    replay.insert(fd);
                }
                Op::Dup2 { dst, .. } => {
                    replay.insert(dst);
                }
                Op::Close { fd } => {
                    replay.remove(&fd);
                }
            }
        }
        assert_eq!(&replay, fdops.live_fds());
    }

    #[test]
    fn keep_fds_is_sorted() {
        let mut fdops = FdOps::new([2, 0, 1]);
        fdops.add_live(9);
        fdops.add_live(4);
        assert_eq!(fdops.keep_fds(), vec![0, 1, 2, 4, 9]);
    }
}
