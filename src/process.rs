//! A spawned child process and its exit status.
//!
//! The engine waits on children through [`tokio::process::Child`] rather
//! than polling `waitpid` by hand: tokio's own reactor reaps children via a
//! `SIGCHLD`-driven signal handler and resolves `Child::wait` as a future,
//! giving the single cooperative scheduling loop this engine needs without
//! a second hand-rolled event loop alongside it.

use std::os::unix::process::ExitStatusExt;

/// A process's termination state, normalized to the POSIX shell convention:
/// a process killed by signal N is reported as exit code `128 + N`. There is
/// deliberately no separate "signalled" variant — callers that want a raw
/// signal number can still ask for it, but pipefail aggregation and
/// `NonZeroExit` always see the normalized code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(std::process::ExitStatus);

impl ExitStatus {
    pub(crate) fn new(status: std::process::ExitStatus) -> Self {
        ExitStatus(status)
    }

    /// The normalized exit code: the raw exit code, `128 + signal` if the
    /// process was killed by a signal, or `0` if neither is observable.
    pub fn code(&self) -> i32 {
        if let Some(code) = self.0.code() {
            return code;
        }
        if let Some(signal) = self.0.signal() {
            return 128 + signal;
        }
        0
    }

    /// The raw signal that terminated the process, if any.
    pub fn signal(&self) -> Option<i32> {
        self.0.signal()
    }

    /// True if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.0.success()
    }
}

/// A live or exited child process. The runtime's flat process list (§9)
/// holds one of these per spawned command and per process-substitution
/// sub-child; cleanup sends `SIGKILL` to whichever of them are still
/// running and then awaits all of their waits under a cancellation shield.
pub struct Process {
    child: tokio::process::Child,
    argv0: String,
}

impl Process {
    pub(crate) fn new(child: tokio::process::Child, argv0: String) -> Self {
        Process { child, argv0 }
    }

    /// The command name this process was spawned from, for diagnostics.
    pub fn argv0(&self) -> &str {
        &self.argv0
    }

    /// The kernel pid, if the process has not yet been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Awaits the process's natural termination.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        log::debug!(
            "process {:?} (pid {:?}) reaped: {status}",
            self.argv0,
            status.code().or(status.signal())
        );
        Ok(ExitStatus::new(status))
    }

    /// Sends `SIGKILL`. Used exclusively by cleanup: normal termination is
    /// left to the process itself or to pipefail semantics, never to an
    /// explicit signal from anywhere else in the engine.
    pub fn kill(&self) -> std::io::Result<()> {
        match self.pid() {
            Some(pid) => {
                log::warn!("cleanup killing {:?} (pid {pid})", self.argv0);
                crate::posix::kill(pid as libc::pid_t, libc::SIGKILL)
            }
            None => Ok(()),
        }
    }
}
