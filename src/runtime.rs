//! Spawns a [`Runnable`] graph, waits for it under pipefail semantics, and
//! guarantees cleanup — every spawned process reaped, every allocated pipe
//! closed — even if the caller's future is dropped before completion (e.g.
//! wrapped in [`tokio::time::timeout`]).
//!
//! The graph is spawned and awaited inside a detached [`tokio::spawn`] task
//! so that dropping the public `run`/`out` future never interrupts
//! cleanup-in-progress; what it *does* do is trigger an immediate
//! `SIGKILL` of every process spawned so far, via [`CleanupGuard`], turning
//! "the caller stopped waiting" into "the pipeline dies now" rather than
//! "the pipeline leaks in the background."

use std::future::Future;
use std::os::unix::io::{FromRawFd, RawFd};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use crate::fdops::FdOps;
use crate::ir::{Arg, Command, Pipeline, Redirect, Runnable, Sub, SubIn, SubOut};
use crate::posix;
use crate::process::Process;
use crate::{Error, Result};

/// Bookkeeping shared across one call to [`run`] or [`out`]: every spawned
/// process (root stages and process-substitution children alike) and every
/// background data-feeder task, plus the next high fd number available for
/// a `/dev/fd/N` substitution argument.
struct PrepareCtx {
    processes: Vec<Process>,
    feeders: Vec<tokio::task::JoinHandle<()>>,
    /// Flat list of parent-side raw fds this execution has allocated
    /// (pipe ends) that are not yet owned by something that closes them
    /// unconditionally on its own (a `Stdio` closes its fd on drop whether
    /// or not the spawn it was destined for ever happens). Every fd here
    /// is closed by `cleanup`, so a redirect-translation or spawn error
    /// partway through a command or pipeline never leaks one.
    fds: Vec<RawFd>,
    next_sub_fd: i32,
}

impl PrepareCtx {
    fn new() -> Self {
        PrepareCtx {
            processes: Vec::new(),
            feeders: Vec::new(),
            fds: Vec::new(),
            // Starts high and counts down, staying clear of the fd numbers
            // an ordinary command's own explicit redirects would plausibly
            // target.
            next_sub_fd: 63,
        }
    }

    fn alloc_sub_fd(&mut self) -> i32 {
        let fd = self.next_sub_fd;
        self.next_sub_fd -= 1;
        fd
    }

    /// Registers a freshly allocated raw fd as the flat list's
    /// responsibility until some other owner (an explicit close, or a
    /// `Stdio` handed off for spawning) takes over.
    fn track_fd(&mut self, fd: RawFd) {
        self.fds.push(fd);
    }

    /// Removes `fd` from the flat list: either it was just closed
    /// explicitly, or ownership passed to a `Stdio` that closes it on drop
    /// regardless of whether the spawn it was destined for succeeds.
    fn untrack_fd(&mut self, fd: RawFd) {
        if let Some(pos) = self.fds.iter().position(|&f| f == fd) {
            self.fds.swap_remove(pos);
        }
    }
}

/// Executes `runnable` and returns the pipefail exit code: the rightmost
/// non-zero exit code among its root stages, or 0 if all of them succeeded.
/// Process-substitution children do not participate in this aggregation.
pub async fn run(runnable: &Runnable) -> Result<i32> {
    let (code, _captured) = run_captured(runnable, false).await?;
    Ok(code)
}

/// Executes `runnable` and returns its captured stdout. Returns
/// [`Error::NonZeroExit`] (carrying whatever had already been captured) if
/// the pipefail exit code is non-zero.
pub async fn out(runnable: &Runnable) -> Result<Vec<u8>> {
    let (code, captured) = run_captured(runnable, true).await?;
    if code != 0 {
        return Err(Error::NonZeroExit {
            exit_code: code,
            argv: root_argv(runnable),
            captured,
        });
    }
    Ok(captured)
}

fn root_argv(runnable: &Runnable) -> Vec<String> {
    let last = match runnable {
        Runnable::Command(cmd) => cmd,
        Runnable::Pipeline(pipeline) => match pipeline.stages().last() {
            Some(cmd) => cmd,
            None => return Vec::new(),
        },
    };
    last.args_slice()
        .iter()
        .map(|arg| match arg {
            Arg::Str(s) => s.clone(),
            Arg::Sub(_) => "<process substitution>".to_string(),
        })
        .collect()
}

/// Guards a detached execution: if dropped while `armed`, sends `SIGKILL`
/// to every pid still tracked. Each pid is untracked the moment its process
/// is actually reaped, closing the window in which a dropped guard could
/// send a signal to a pid the kernel has since recycled.
struct CleanupGuard {
    pids: Arc<Mutex<Vec<i32>>>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for pid in self.pids.lock().unwrap().drain(..) {
            let _ = posix::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

fn untrack(pids: &Mutex<Vec<i32>>, pid: i32) {
    let mut guard = pids.lock().unwrap();
    if let Some(pos) = guard.iter().position(|&p| p == pid) {
        guard.swap_remove(pos);
    }
}

async fn run_captured(runnable: &Runnable, capture: bool) -> Result<(i32, Vec<u8>)> {
    let runnable = runnable.clone();
    let pids = Arc::new(Mutex::new(Vec::new()));
    let guard = CleanupGuard {
        pids: Arc::clone(&pids),
    };
    let handle = tokio::spawn(execute(runnable, capture, pids));
    let outcome = handle.await;
    drop(guard);
    match outcome {
        Ok(result) => result,
        Err(join_err) => Err(Error::Io(std::io::Error::other(join_err))),
    }
}

async fn execute(
    runnable: Runnable,
    capture: bool,
    pids: Arc<Mutex<Vec<i32>>>,
) -> Result<(i32, Vec<u8>)> {
    let mut ctx = PrepareCtx::new();

    let mut capture_read: Option<RawFd> = None;
    let stdout_override = if capture {
        match posix::pipe() {
            Ok((read_raw, write_raw)) => {
                capture_read = Some(read_raw);
                Some(Stdio::from(unsafe { std::fs::File::from_raw_fd(write_raw) }))
            }
            Err(e) => return Err(Error::Io(e)),
        }
    } else {
        None
    };

    let roots = match spawn_runnable(&runnable, None, stdout_override, &mut ctx).await {
        Ok(roots) => roots,
        Err(e) => {
            if let Some(fd) = capture_read {
                unsafe {
                    libc::close(fd);
                }
            }
            cleanup(ctx, &pids).await;
            return Err(e);
        }
    };

    {
        let mut guard = pids.lock().unwrap();
        for process in &ctx.processes {
            if let Some(pid) = process.pid() {
                guard.push(pid as i32);
            }
        }
    }

    let captured = match capture_read {
        Some(fd) => match crate::aio::read_to_end(fd).await {
            Ok(bytes) => bytes,
            Err(e) => {
                cleanup(ctx, &pids).await;
                return Err(Error::Io(e));
            }
        },
        None => Vec::new(),
    };

    let mut code = 0;
    for idx in roots {
        let pid = ctx.processes[idx].pid().map(|p| p as i32);
        match ctx.processes[idx].wait().await {
            Ok(status) => {
                if let Some(pid) = pid {
                    untrack(&pids, pid);
                }
                if status.code() != 0 {
                    code = status.code();
                }
            }
            Err(e) => {
                cleanup(ctx, &pids).await;
                return Err(Error::Io(e));
            }
        }
    }

    cleanup(ctx, &pids).await;
    Ok((code, captured))
}

/// Sends `SIGKILL` to everything still alive, then reaps every process,
/// joins every feeder task, and closes every fd still in the flat list.
/// Always runs to completion: the caller (a detached `tokio::spawn` task)
/// is never itself cancelled, so this always gets to finish even when the
/// public `run`/`out` future was dropped.
///
/// Every process reaped here — root stages already waited on above, and
/// any process-substitution sub-children, which never go through that
/// loop — is `untrack`ed from `pids` as it's reaped, so `CleanupGuard`'s
/// drop (armed for as long as this function is still running) never
/// signals a pid the kernel has since recycled. Likewise, every fd still
/// in `ctx.fds` at this point is one a redirect-translation or spawn error
/// never got to close explicitly; closing it here is what keeps an
/// interrupted command or pipeline from leaking a pipe end.
async fn cleanup(mut ctx: PrepareCtx, pids: &Mutex<Vec<i32>>) {
    for process in &ctx.processes {
        let _ = process.kill();
    }
    for handle in ctx.feeders.drain(..) {
        let _ = handle.await;
    }
    for process in ctx.processes.iter_mut() {
        let pid = process.pid().map(|p| p as i32);
        let _ = process.wait().await;
        if let Some(pid) = pid {
            untrack(pids, pid);
        }
    }
    for fd in ctx.fds.drain(..) {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Spawns `runnable`, wiring `stdin_override`/`stdout_override` onto its
/// first stage's stdin / last stage's stdout (or its only stage's, for a
/// bare command). Returns the indices into `ctx.processes` of the spawned
/// root stages, in left-to-right order — callers that don't want their
/// exit codes counted (process substitutions) simply discard this list.
///
/// Returns a boxed future because this function and [`spawn_command`] are
/// mutually recursive through process substitution: a command's argument
/// or redirect can itself be `<(another pipeline)`.
fn spawn_runnable<'a>(
    runnable: &'a Runnable,
    stdin_override: Option<Stdio>,
    stdout_override: Option<Stdio>,
    ctx: &'a mut PrepareCtx,
) -> Pin<Box<dyn Future<Output = Result<Vec<usize>>> + Send + 'a>> {
    Box::pin(async move {
        match runnable {
            Runnable::Command(cmd) => {
                let stdin = stdin_override.unwrap_or_else(Stdio::inherit);
                let stdout = stdout_override.unwrap_or_else(Stdio::inherit);
                let idx = spawn_command(cmd, stdin, stdout, ctx).await?;
                Ok(vec![idx])
            }
            Runnable::Pipeline(pipeline) => spawn_pipeline(pipeline, stdin_override, stdout_override, ctx).await,
        }
    })
}

async fn spawn_pipeline(
    pipeline: &Pipeline,
    mut stdin_override: Option<Stdio>,
    mut stdout_override: Option<Stdio>,
    ctx: &mut PrepareCtx,
) -> Result<Vec<usize>> {
    let stages = pipeline.stages();
    if stages.is_empty() {
        return Ok(Vec::new());
    }
    let n = stages.len();

    // Eagerly allocate every inter-stage pipe before spawning anything, so
    // a failure partway through never leaves a later stage's stdin
    // unallocated while an earlier stage is already running. Both ends of
    // every pipe are tracked in `ctx.fds` the moment they're allocated, so
    // a stage not yet reached when a later allocation or spawn fails still
    // gets its pipe ends closed by `cleanup` rather than leaked.
    let mut pipes = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let (read_raw, write_raw) = posix::pipe()?;
        ctx.track_fd(read_raw);
        ctx.track_fd(write_raw);
        pipes.push((read_raw, write_raw));
    }

    let mut indices = Vec::with_capacity(n);
    for (i, stage) in stages.iter().enumerate() {
        let stdin = if i == 0 {
            stdin_override.take().unwrap_or_else(Stdio::inherit)
        } else {
            let (read_raw, _) = pipes[i - 1];
            ctx.untrack_fd(read_raw);
            Stdio::from(unsafe { std::fs::File::from_raw_fd(read_raw) })
        };
        let stdout = if i == n - 1 {
            stdout_override.take().unwrap_or_else(Stdio::inherit)
        } else {
            let (_, write_raw) = pipes[i];
            ctx.untrack_fd(write_raw);
            Stdio::from(unsafe { std::fs::File::from_raw_fd(write_raw) })
        };
        let idx = spawn_command(stage, stdin, stdout, ctx).await?;
        indices.push(idx);
    }
    Ok(indices)
}

/// Translates one command's arguments and redirects into an `FdOps` op
/// list and spawns it, returning the index of its `Process` in
/// `ctx.processes`.
async fn spawn_command(cmd: &Command, stdin: Stdio, stdout: Stdio, ctx: &mut PrepareCtx) -> Result<usize> {
    let mut fdops = FdOps::new([0, 1, 2]);
    let mut argv = Vec::with_capacity(cmd.args_slice().len());
    // Parent-side copies of fds wired into the child exclusively through
    // `fdops` (never through `Stdio`, which auto-closes its own parent
    // copy): must be closed here, after this command has been spawned, or
    // they leak and can stall the other end's EOF/EPIPE detection. Each is
    // also tracked in `ctx.fds` from the moment it's allocated (see
    // `resolve_sub_in`/`resolve_sub_out`/the `FdFromData` arm below), so a
    // later redirect or the spawn itself failing before this list is
    // drained still gets every one of them closed by `cleanup`.
    let mut to_close: Vec<RawFd> = Vec::new();

    for arg in cmd.args_slice() {
        match arg {
            Arg::Str(s) => argv.push(s.clone()),
            Arg::Sub(sub) => {
                let fd = ctx.alloc_sub_fd();
                let raw = resolve_sub(sub, ctx).await?;
                fdops.add_live(raw);
                fdops
                    .move_fd(raw, fd)
                    .map_err(|source| Error::Redirect { fd, source })?;
                to_close.push(raw);
                argv.push(format!("/dev/fd/{fd}"));
            }
        }
    }

    for redirect in cmd.redirects_slice() {
        match redirect {
            Redirect::FdToFile { fd, path, append } => {
                let flags = libc::O_WRONLY
                    | libc::O_CREAT
                    | if *append { libc::O_APPEND } else { libc::O_TRUNC };
                let bytes = posix::path_to_nul_terminated(path)?;
                fdops.open(*fd, bytes, flags);
            }
            Redirect::FdFromFile { fd, path } => {
                let bytes = posix::path_to_nul_terminated(path)?;
                fdops.open(*fd, bytes, libc::O_RDONLY);
            }
            Redirect::FdFromData { fd, data } => {
                let (read_raw, write_raw) = posix::pipe()?;
                ctx.track_fd(read_raw);
                fdops.add_live(read_raw);
                fdops
                    .move_fd(read_raw, *fd)
                    .map_err(|source| Error::Redirect { fd: *fd, source })?;
                to_close.push(read_raw);

                let data = data.clone();
                let write_owned = crate::ownedfd::OwnedFd::new(write_raw);
                ctx.feeders.push(tokio::spawn(async move {
                    let _ = crate::aio::write_all(&write_owned, &data).await;
                }));
            }
            Redirect::FdToFd { src, dst } => {
                fdops
                    .dup2(*src, *dst)
                    .map_err(|source| Error::Redirect { fd: *dst, source })?;
            }
            Redirect::FdClose { fd } => {
                fdops.close(*fd);
            }
            Redirect::FdFromSub { fd, sub } => {
                let raw = resolve_sub_in(sub, ctx).await?;
                fdops.add_live(raw);
                fdops
                    .move_fd(raw, *fd)
                    .map_err(|source| Error::Redirect { fd: *fd, source })?;
                to_close.push(raw);
            }
            Redirect::FdToSub { fd, sub } => {
                let raw = resolve_sub_out(sub, ctx).await?;
                fdops.add_live(raw);
                fdops
                    .move_fd(raw, *fd)
                    .map_err(|source| Error::Redirect { fd: *fd, source })?;
                to_close.push(raw);
            }
        }
    }

    let process = crate::spawn::spawn(
        &argv,
        cmd.env_slice(),
        cmd.cwd_path(),
        cmd.unix_options(),
        &fdops,
        stdin,
        stdout,
        Stdio::inherit(),
    )?;

    for fd in to_close {
        ctx.untrack_fd(fd);
        unsafe {
            libc::close(fd);
        }
    }

    ctx.processes.push(process);
    Ok(ctx.processes.len() - 1)
}

async fn resolve_sub(sub: &Sub, ctx: &mut PrepareCtx) -> Result<RawFd> {
    match sub {
        Sub::In(sub_in) => resolve_sub_in(sub_in, ctx).await,
        Sub::Out(sub_out) => resolve_sub_out(sub_out, ctx).await,
    }
}

/// Spawns `sub`'s runnable with its stdout wired to a fresh pipe and
/// returns the read end, to be wired onto the enclosing command's target
/// fd. The inner runnable's own exit code is tracked for cleanup only — it
/// never contributes to pipefail.
async fn resolve_sub_in(sub: &SubIn, ctx: &mut PrepareCtx) -> Result<RawFd> {
    let (read_raw, write_raw) = posix::pipe()?;
    // `write_raw` is wrapped into a `Stdio` immediately below, so it's the
    // `Stdio`'s job to close it on drop regardless of outcome. `read_raw`
    // is returned to the caller unwrapped, so the flat list is responsible
    // for it until the caller's own `move_fd`/`to_close` handling takes
    // over (or, on an error return anywhere in between, `cleanup` does).
    ctx.track_fd(read_raw);
    let stdout = Stdio::from(unsafe { std::fs::File::from_raw_fd(write_raw) });
    spawn_runnable(&sub.0, None, Some(stdout), ctx).await?;
    Ok(read_raw)
}

/// Spawns `sub`'s runnable with its stdin wired to a fresh pipe and returns
/// the write end, to be wired onto the enclosing command's target fd.
async fn resolve_sub_out(sub: &SubOut, ctx: &mut PrepareCtx) -> Result<RawFd> {
    let (read_raw, write_raw) = posix::pipe()?;
    // Mirrors `resolve_sub_in`: `read_raw` is handed straight to a `Stdio`,
    // `write_raw` is the one returned unwrapped and tracked until the
    // caller closes it or an error sends it through `cleanup` instead.
    ctx.track_fd(write_raw);
    let stdin = Stdio::from(unsafe { std::fs::File::from_raw_fd(read_raw) });
    spawn_runnable(&sub.0, Some(stdin), None, ctx).await?;
    Ok(write_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cmd;

    #[tokio::test]
    async fn run_returns_exit_code() {
        let code = run(&Runnable::Command(cmd("sh").arg("-c").arg("exit 7")))
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn out_captures_stdout() {
        let bytes = out(&Runnable::Command(cmd("echo").arg("-n").arg("hi")))
            .await
            .unwrap();
        assert_eq!(bytes, b"hi");
    }

    #[tokio::test]
    async fn pipeline_pipefail_picks_rightmost_nonzero() {
        let pipeline = cmd("sh")
            .arg("-c")
            .arg("exit 3")
            .pipe(cmd("sh").arg("-c").arg("exit 0"))
            .pipe(cmd("sh").arg("-c").arg("exit 5"));
        let code = run(&Runnable::Pipeline(pipeline)).await.unwrap();
        assert_eq!(code, 5);
    }

    #[tokio::test]
    async fn out_on_nonzero_exit_carries_captured_bytes() {
        let err = out(&Runnable::Command(
            cmd("sh").arg("-c").arg("printf partial; exit 1"),
        ))
        .await
        .unwrap_err();
        assert_eq!(err.captured(), Some(b"partial".as_slice()));
    }

    #[tokio::test]
    async fn feed_data_reaches_child_stdin() {
        let bytes = out(&Runnable::Command(
            cmd("cat").feed("hello from the runtime"),
        ))
        .await
        .unwrap();
        assert_eq!(bytes, b"hello from the runtime");
    }
}
