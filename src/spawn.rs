//! Turns a fully translated command (resolved argv, environment overlay,
//! working directory, Unix options, and an already-built `FdOps` op list)
//! into a running child process.
//!
//! Everything the closure below touches is pre-allocated, owned data (no
//! further syscalls besides the ones [`posix::exec_ops`] itself makes) —
//! `pre_exec` runs in a single-threaded child between `fork` and `exec`,
//! where allocating or locking is unsound.

use std::os::unix::process::CommandExt as _;
use std::path::Path;
use std::process::Stdio;

use crate::fdops::FdOps;
use crate::ir::{EnvVar, UnixOptions};
use crate::posix;
use crate::process::Process;
use crate::{Error, Result};

/// Spawns a child with `stdin`/`stdout`/`stderr` already positioned as its
/// initial fds 0/1/2 (wired by the pipeline layer in `crate::runtime` before
/// this command's own `fdops` op list runs — since `std::process::Command`
/// dup2s `Stdio` onto 0/1/2 before invoking `pre_exec`, this command's own
/// redirects on those same fds still apply last and win).
pub(crate) fn spawn(
    argv: &[String],
    env: &[EnvVar],
    cwd: Option<&Path>,
    unix: &UnixOptions,
    fdops: &FdOps,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Process> {
    let argv0 = argv.first().cloned().unwrap_or_default();
    if argv0.is_empty() {
        return Err(Error::Spawn {
            argv0,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        });
    }

    let mut command = tokio::process::Command::new(&argv0);
    command.args(&argv[1..]);
    command.stdin(stdin);
    command.stdout(stdout);
    command.stderr(stderr);
    command.kill_on_drop(false);

    if let Some(cwd) = cwd {
        command.current_dir(cwd);
        // Shells set `PWD` alongside `chdir`. Set it before the overlay
        // loop below so an explicit `PWD` entry in the overlay still wins,
        // matching the overlay's own last-write-wins ordering.
        command.env("PWD", cwd);
    }
    for var in env {
        match &var.value {
            Some(value) => {
                command.env(&var.name, value);
            }
            None => {
                command.env_remove(&var.name);
            }
        }
    }

    let ops = fdops.ops().to_vec();
    let unix = unix.clone();
    // SAFETY: the closure only calls `setgid`/`setuid`/`setpgid` and
    // `exec_ops`, all async-signal-safe, and runs in the freshly forked,
    // still single-threaded child.
    unsafe {
        command.pre_exec(move || {
            apply_unix_options(&unix)?;
            posix::exec_ops(&ops)
        });
    }

    log::debug!("spawning {argv:?}");
    let child = command.spawn().map_err(|source| Error::Spawn {
        argv0: argv0.clone(),
        source,
    })?;
    Ok(Process::new(child, argv0))
}

/// Applies `setgid`/`setuid`/`setpgid` in that order: group before user, so
/// dropping privilege with `setuid` doesn't strip the capability the gid
/// change still needs.
fn apply_unix_options(unix: &UnixOptions) -> std::io::Result<()> {
    if let Some(gid) = unix.gid {
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    if let Some(uid) = unix.uid {
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    if unix.setpgid && unsafe { libc::setpgid(0, 0) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
