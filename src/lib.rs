//! Programmatic shell-pipeline execution.
//!
//! A [`Command`] or [`Pipeline`] is an immutable, value-equal description of
//! a runnable process graph: argv, an ordered redirect list (files,
//! `dup2`-style fd aliasing, literal data fed through a pipe, process
//! substitution), an environment overlay, and a working directory. Building
//! one never touches the OS — only [`Command::run`]/[`Command::out`] (and
//! the equivalents on [`Pipeline`] and [`Runnable`]) spawn anything, via the
//! async runtime underneath.
//!
//! Compared to driving [`std::process::Command`] directly, this crate adds:
//!
//! * Pipelines of arbitrary length with `pipefail` exit-code semantics —
//!   the reported code is the rightmost non-zero exit among the stages,
//!   not just the last stage's.
//! * Redirection onto arbitrary file descriptors, not just 0/1/2, including
//!   `dup2`-style aliasing (`2>&1`) and here-string data injection.
//! * Process substitution (`<(cmd)` / `>(cmd)`): an inner [`Runnable`]
//!   wired to a `/dev/fd/N` path or to a specific redirect target, whose
//!   own exit code is deliberately excluded from pipefail.
//! * Leak-free cleanup: every invocation guarantees that on return — by
//!   success, non-zero exit, spawn failure, or cancellation — no process it
//!   spawned is still alive and no fd it allocated remains open in the
//!   caller's process.
//!
//! # Examples
//!
//! Build IR directly and run a pipeline:
//!
//! ```no_run
//! # async fn go() -> shellpipe::Result<()> {
//! use shellpipe::cmd;
//!
//! let pipeline = cmd("echo").arg("hello").pipe(cmd("tr").args(["a-z", "A-Z"]));
//! let out = pipeline.out_str().await?;
//! assert_eq!(out, "HELLO\n");
//! # Ok(())
//! # }
//! ```
//!
//! Or use the operator-overloaded builder surface, where each stage is
//! still one argv (`sh()` is [`cmd`] under another name — it does not
//! split on whitespace; use [`shell`] to run a whole shell command line):
//!
//! ```no_run
//! # async fn go() -> shellpipe::Result<()> {
//! use shellpipe::{sh, shell};
//!
//! let pipeline = shell("echo hello") | sh("tr").args(["a-z", "A-Z"]);
//! let code = pipeline.run().await?;
//! assert_eq!(code, 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod aio;
mod builder;
mod chunk;
mod error;
pub mod fdops;
mod ir;
mod ownedfd;
mod posix;
mod process;
mod runtime;
mod spawn;

pub use builder::{sh, shell, Append};
pub use error::Error;
pub use ir::{
    cmd, pipeline, Arg, Command, Data, EnvVar, Pipeline, ReadSrc, Redirect, Runnable, Sub, SubIn,
    SubOut, UnixOptions, WriteDst, STDERR, STDIN, STDOUT,
};
pub use runtime::{out, run};

/// This crate's fallible result type.
pub type Result<T> = std::result::Result<T, Error>;
