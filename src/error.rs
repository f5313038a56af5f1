//! The engine's error taxonomy.
//!
//! Every fallible public operation returns [`crate::Result<T>`]
//! (`Result<T, Error>`). Unlike a blanket `io::Result`, callers can match on
//! *why* execution failed: infrastructure failure (`Spawn`, `Io`), an
//! IR-level mistake caught before any process ran (`Redirect`), or a
//! semantic failure surfaced only by [`crate::runtime::out`] (`NonZeroExit`).
//! A child killed by a signal is not a distinct error kind — it is folded
//! into the exit code as `128 + signo`, per POSIX shell convention.

use std::io;

use crate::fdops::NotLive;

/// The engine's error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The spawn primitive failed: the command was not found, permission
    /// was denied, or the kernel refused to fork/exec. Surfaced after
    /// best-effort cleanup of anything already spawned or allocated.
    #[error("failed to spawn {argv0:?}: {source}")]
    Spawn { argv0: String, source: io::Error },

    /// An IR-level inconsistency was caught while translating a command's
    /// redirects, before any process was spawned.
    #[error("invalid redirect on fd {fd}: {source}")]
    Redirect { fd: i32, source: NotLive },

    /// `out()` observed a non-zero exit. Carries the exit code, the
    /// offending argv (empty if unknown, e.g. for a pipeline), and
    /// whatever stdout had already been captured.
    #[error("command exited with code {exit_code}")]
    NonZeroExit {
        exit_code: i32,
        argv: Vec<String>,
        captured: Vec<u8>,
    },

    /// An unexpected I/O error (disk full on a redirected file, an
    /// unusual kernel condition on a pipe). Cleanup still runs before this
    /// propagates.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Captured stdout was not valid UTF-8 when the caller requested a
    /// decoded `String`.
    #[error("captured output is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    /// The captured bytes, if this is a [`Error::NonZeroExit`].
    pub fn captured(&self) -> Option<&[u8]> {
        match self {
            Error::NonZeroExit { captured, .. } => Some(captured),
            _ => None,
        }
    }
}
