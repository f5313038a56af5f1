//! Operator-overloaded surface syntax over the immutable [`crate::ir`]
//! graph: `a | b` builds a pipeline the same way [`Command::pipe`] does,
//! and `cmd > "file"` / `cmd < "file"` read like the shell redirects they
//! mirror. This module is a thin convenience layer — every operator here
//! is defined purely in terms of the builder methods already on
//! [`Command`]/[`Pipeline`], so nothing here participates in execution.

use std::ops::{BitOr, Shl, Shr};

use crate::ir::{Command, Data, Pipeline, ReadSrc, WriteDst};

/// Wraps a path so `cmd >> path` (append) can be distinguished from
/// `cmd > path` (truncate) despite both taking a path-like right-hand side.
#[derive(Debug, Clone)]
pub struct Append<T>(pub T);

impl BitOr<Command> for Command {
    type Output = Pipeline;

    /// `a | b` — pipes `a`'s stdout into `b`'s stdin.
    fn bitor(self, rhs: Command) -> Pipeline {
        self.pipe(rhs)
    }
}

impl BitOr<Command> for Pipeline {
    type Output = Pipeline;

    /// Appends a stage to an existing pipeline.
    fn bitor(self, rhs: Command) -> Pipeline {
        self.pipe(rhs)
    }
}

impl BitOr<Pipeline> for Pipeline {
    type Output = Pipeline;

    /// Concatenates two pipelines into one flat pipeline.
    fn bitor(self, rhs: Pipeline) -> Pipeline {
        let mut stages: Vec<_> = self.stages().to_vec();
        stages.extend(rhs.stages().iter().cloned());
        Pipeline::new(stages.into_iter().map(Into::into))
    }
}

impl<T> Shr<T> for Command
where
    T: Into<WriteDst>,
{
    type Output = Command;

    /// `cmd > dst` — writes stdout to `dst`, truncating.
    fn shr(self, dst: T) -> Command {
        self.write(dst)
    }
}

impl<T> Shr<Append<T>> for Command
where
    T: Into<WriteDst>,
{
    type Output = Command;

    /// `cmd >> Append(dst)` — appends stdout to `dst`.
    fn shr(self, dst: Append<T>) -> Command {
        self.append(dst.0)
    }
}

impl<T> Shl<T> for Command
where
    T: Into<ReadSrc>,
{
    type Output = Command;

    /// `cmd < src` — reads stdin from `src`.
    fn shl(self, src: T) -> Command {
        self.read(src)
    }
}

impl<T> Shl<T> for Pipeline
where
    T: Into<ReadSrc>,
{
    type Output = Pipeline;

    /// `pipeline < src` — reads the first stage's stdin from `src`.
    fn shl(self, src: T) -> Pipeline {
        self.read(src)
    }
}

impl<T> Shr<T> for Pipeline
where
    T: Into<WriteDst>,
{
    type Output = Pipeline;

    /// `pipeline > dst` — writes the last stage's stdout to `dst`.
    fn shr(self, dst: T) -> Pipeline {
        self.write(dst)
    }
}

impl<T> Shr<Append<T>> for Pipeline
where
    T: Into<WriteDst>,
{
    type Output = Pipeline;

    /// `pipeline >> Append(dst)` — appends the last stage's stdout to `dst`.
    fn shr(self, dst: Append<T>) -> Pipeline {
        self.append(dst.0)
    }
}

impl Shl<Data> for Command {
    type Output = Command;

    /// `cmd << data` — feeds literal data into stdin.
    fn shl(self, data: Data) -> Command {
        self.feed(data)
    }
}

impl Shl<&str> for Command {
    type Output = Command;

    fn shl(self, data: &str) -> Command {
        self.feed(data)
    }
}

impl Shl<String> for Command {
    type Output = Command;

    fn shl(self, data: String) -> Command {
        self.feed(data)
    }
}

/// Starts a command with `program` as argv[0], for use with the operator
/// overloads in this module. Identical to [`crate::ir::cmd`]; re-exported
/// here for call sites that only want the builder-style surface.
pub fn sh(program: impl Into<String>) -> Command {
    Command::new(program)
}

/// Builds a command that runs `script` under the platform shell, the way
/// `Exec::shell` did before this crate's pipelines grew an explicit IR:
/// `sh -c <script>`.
pub fn shell(script: impl Into<String>) -> Command {
    Command::new("sh").arg("-c").arg(script.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Runnable;

    #[test]
    fn pipe_operator_builds_two_stage_pipeline() {
        let p = sh("a") | sh("b");
        assert_eq!(p.stages().len(), 2);
    }

    #[test]
    fn pipe_operator_chains_three_stages() {
        let p = sh("a") | sh("b") | sh("c");
        assert_eq!(p.stages().len(), 3);
    }

    #[test]
    fn redirect_operators_apply_in_order() {
        let cmd = sh("tr") < "in.txt" >> Append("out.txt");
        match cmd.redirects_slice() {
            [crate::ir::Redirect::FdFromFile { fd: 0, .. }, crate::ir::Redirect::FdToFile { fd: 1, append: true, .. }] => {
            }
            other => panic!("unexpected redirects: {other:?}"),
        }
    }

    #[test]
    fn feed_operator_sets_stdin_data() {
        let cmd = sh("cat") << "payload";
        match cmd.redirects_slice() {
            [crate::ir::Redirect::FdFromData { fd: 0, data }] => {
                assert_eq!(*data, crate::ir::Data::Text("payload".to_string()));
            }
            other => panic!("unexpected redirects: {other:?}"),
        }
    }

    #[tokio::test]
    async fn feed_operator_payload_reaches_child_stdin() {
        let cmd = sh("cat") << "payload";
        let out = Runnable::Command(cmd).out().await.unwrap();
        assert_eq!(out, b"payload");
    }
}
