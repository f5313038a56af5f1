//! Immutable intermediate representation of runnable command graphs.
//!
//! A [`Command`] is an ordered argument list, an ordered redirect list, an
//! environment overlay and an optional working directory. A [`Pipeline`] is
//! a flat, ordered sequence of `Command`s. [`Runnable`] is the sum of the
//! two. Every builder method here consumes `self` and returns a new value;
//! nothing is ever mutated in place, so a `Command` handed to one caller can
//! be frozen and reused by another without aliasing surprises.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Standard input, for readability at call sites. Any non-negative integer
/// fd is valid; these aliases carry no special meaning to the engine.
pub const STDIN: i32 = 0;
/// Standard output.
pub const STDOUT: i32 = 1;
/// Standard error.
pub const STDERR: i32 = 2;

/// One positional argument: a literal string, or an embedded process
/// substitution that resolves to a `/dev/fd/N` path at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Sub(Sub),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<&Path> for Arg {
    fn from(p: &Path) -> Self {
        Arg::Str(p.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for Arg {
    fn from(p: PathBuf) -> Self {
        Arg::Str(p.to_string_lossy().into_owned())
    }
}

impl From<SubIn> for Arg {
    fn from(s: SubIn) -> Self {
        Arg::Sub(Sub::In(s))
    }
}

impl From<SubOut> for Arg {
    fn from(s: SubOut) -> Self {
        Arg::Sub(Sub::Out(s))
    }
}

/// A process-substitution marker, input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sub {
    In(SubIn),
    Out(SubOut),
}

/// Input process substitution: `<(cmd)`. The inner runnable's stdout is
/// wired to a pipe whose read end appears as `/dev/fd/N` to the enclosing
/// command (or as the source of an `FdFromSub` redirect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubIn(pub Arc<Runnable>);

/// Output process substitution: `>(cmd)`. The inner runnable's stdin is
/// wired to a pipe whose write end appears as `/dev/fd/N` to the enclosing
/// command (or as the target of an `FdToSub` redirect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubOut(pub Arc<Runnable>);

impl SubIn {
    pub fn new(runnable: impl Into<Runnable>) -> Self {
        SubIn(Arc::new(runnable.into()))
    }
}

impl SubOut {
    pub fn new(runnable: impl Into<Runnable>) -> Self {
        SubOut(Arc::new(runnable.into()))
    }
}

/// Target of a read redirect: a filesystem path or an input substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSrc {
    Path(PathBuf),
    Sub(SubIn),
}

impl From<&str> for ReadSrc {
    fn from(s: &str) -> Self {
        ReadSrc::Path(PathBuf::from(s))
    }
}
impl From<String> for ReadSrc {
    fn from(s: String) -> Self {
        ReadSrc::Path(PathBuf::from(s))
    }
}
impl From<&Path> for ReadSrc {
    fn from(p: &Path) -> Self {
        ReadSrc::Path(p.to_path_buf())
    }
}
impl From<PathBuf> for ReadSrc {
    fn from(p: PathBuf) -> Self {
        ReadSrc::Path(p)
    }
}
impl From<SubIn> for ReadSrc {
    fn from(s: SubIn) -> Self {
        ReadSrc::Sub(s)
    }
}

/// Target of a write redirect: a filesystem path or an output substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDst {
    Path(PathBuf),
    Sub(SubOut),
}

impl From<&str> for WriteDst {
    fn from(s: &str) -> Self {
        WriteDst::Path(PathBuf::from(s))
    }
}
impl From<String> for WriteDst {
    fn from(s: String) -> Self {
        WriteDst::Path(PathBuf::from(s))
    }
}
impl From<&Path> for WriteDst {
    fn from(p: &Path) -> Self {
        WriteDst::Path(p.to_path_buf())
    }
}
impl From<PathBuf> for WriteDst {
    fn from(p: PathBuf) -> Self {
        WriteDst::Path(p)
    }
}
impl From<SubOut> for WriteDst {
    fn from(s: SubOut) -> Self {
        WriteDst::Sub(s)
    }
}

/// A literal payload for `FdFromData`: text is UTF-8 encoded lazily by the
/// streaming chunk encoder (see [`crate::chunk`]); bytes are sliced as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::Text(s.to_string())
    }
}
impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::Text(s)
    }
}
impl From<Vec<u8>> for Data {
    fn from(v: Vec<u8>) -> Self {
        Data::Bytes(v)
    }
}
impl From<&[u8]> for Data {
    fn from(v: &[u8]) -> Self {
        Data::Bytes(v.to_vec())
    }
}

/// One entry in a Command's ordered redirect list. Order is significant:
/// two redirects on the same fd apply in sequence, so the later one is
/// what survives to `exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Open `path` for writing at `fd`, truncating unless `append`.
    FdToFile { fd: i32, path: PathBuf, append: bool },
    /// Open `path` for reading at `fd`.
    FdFromFile { fd: i32, path: PathBuf },
    /// Inject `data` at `fd` through an internally allocated pipe.
    FdFromData { fd: i32, data: Data },
    /// `dup2(src, dst)`.
    FdToFd { src: i32, dst: i32 },
    /// Close `fd`.
    FdClose { fd: i32 },
    /// Wire `sub`'s stdout to `fd` through an internally allocated pipe.
    FdFromSub { fd: i32, sub: SubIn },
    /// Wire `fd` to `sub`'s stdin through an internally allocated pipe.
    FdToSub { fd: i32, sub: SubOut },
}

/// One environment overlay entry. `value: None` unsets the variable;
/// otherwise the declared order is last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
}

/// Optional POSIX process extensions applied inside the same post-fork
/// hook that executes the command's `Op` list (§10.3 of the design doc).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnixOptions {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub setpgid: bool,
}

/// An immutable shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Arc<Vec<Arg>>,
    redirects: Arc<Vec<Redirect>>,
    env: Arc<Vec<EnvVar>>,
    cwd: Option<Arc<PathBuf>>,
    unix: UnixOptions,
}

impl Command {
    /// Starts a command with `program` as argv[0].
    pub fn new(program: impl Into<String>) -> Self {
        Command {
            args: Arc::new(vec![Arg::Str(program.into())]),
            redirects: Arc::new(Vec::new()),
            env: Arc::new(Vec::new()),
            cwd: None,
            unix: UnixOptions::default(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        Arc::make_mut(&mut self.args).push(arg.into());
        self
    }

    /// Appends a sequence of arguments.
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Arc::make_mut(&mut self.args).extend(args.into_iter().map(Into::into));
        self
    }

    /// Reads `fd` (default [`STDIN`]) from a file or input substitution.
    #[must_use]
    pub fn read(self, src: impl Into<ReadSrc>) -> Self {
        self.read_fd(STDIN, src)
    }

    /// Reads `fd` from a file or input substitution.
    #[must_use]
    pub fn read_fd(mut self, fd: i32, src: impl Into<ReadSrc>) -> Self {
        let redirect = match src.into() {
            ReadSrc::Path(path) => Redirect::FdFromFile { fd, path },
            ReadSrc::Sub(sub) => Redirect::FdFromSub { fd, sub },
        };
        Arc::make_mut(&mut self.redirects).push(redirect);
        self
    }

    /// Writes `fd` (default [`STDOUT`]) to a file or output substitution,
    /// truncating the file.
    #[must_use]
    pub fn write(self, dst: impl Into<WriteDst>) -> Self {
        self.write_fd(STDOUT, dst, false)
    }

    /// Appends `fd`'s (default [`STDOUT`]) output to a file.
    #[must_use]
    pub fn append(self, dst: impl Into<WriteDst>) -> Self {
        self.write_fd(STDOUT, dst, true)
    }

    /// Writes `fd` to a file or output substitution.
    #[must_use]
    pub fn write_fd(mut self, fd: i32, dst: impl Into<WriteDst>, append: bool) -> Self {
        let redirect = match dst.into() {
            WriteDst::Path(path) => Redirect::FdToFile { fd, path, append },
            WriteDst::Sub(sub) => Redirect::FdToSub { fd, sub },
        };
        Arc::make_mut(&mut self.redirects).push(redirect);
        self
    }

    /// Duplicates `src` onto `dst` (`dup2`): `dst` becomes a copy of
    /// wherever `src` currently points. `2>&1` is `dup_fd(1, 2)` — fd 2
    /// becomes a copy of fd 1's current target.
    #[must_use]
    pub fn dup_fd(mut self, src: i32, dst: i32) -> Self {
        Arc::make_mut(&mut self.redirects).push(Redirect::FdToFd { src, dst });
        self
    }

    /// Feeds literal data into `fd` (default [`STDIN`]).
    #[must_use]
    pub fn feed(self, data: impl Into<Data>) -> Self {
        self.feed_fd(STDIN, data)
    }

    /// Feeds literal data into `fd`.
    #[must_use]
    pub fn feed_fd(mut self, fd: i32, data: impl Into<Data>) -> Self {
        Arc::make_mut(&mut self.redirects).push(Redirect::FdFromData {
            fd,
            data: data.into(),
        });
        self
    }

    /// Closes `fd` in the child before exec.
    #[must_use]
    pub fn close_fd(mut self, fd: i32) -> Self {
        Arc::make_mut(&mut self.redirects).push(Redirect::FdClose { fd });
        self
    }

    /// Overlays an environment variable.
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.env).push(EnvVar {
            name: name.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Unsets an environment variable in the child.
    #[must_use]
    pub fn env_remove(mut self, name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.env).push(EnvVar {
            name: name.into(),
            value: None,
        });
        self
    }

    /// Sets the child's working directory (and, consequently, its `PWD`).
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(Arc::new(dir.into()));
        self
    }

    /// Sets the uid the child process assumes after fork.
    #[must_use]
    pub fn uid(mut self, uid: u32) -> Self {
        self.unix.uid = Some(uid);
        self
    }

    /// Sets the gid the child process assumes after fork.
    #[must_use]
    pub fn gid(mut self, gid: u32) -> Self {
        self.unix.gid = Some(gid);
        self
    }

    /// Places the child in its own process group.
    #[must_use]
    pub fn setpgid(mut self, on: bool) -> Self {
        self.unix.setpgid = on;
        self
    }

    /// Wraps this command as an input process substitution: `<(self)`.
    #[must_use]
    pub fn sub_in(self) -> SubIn {
        SubIn::new(self)
    }

    /// Wraps this command as an output process substitution: `>(self)`.
    #[must_use]
    pub fn sub_out(self) -> SubOut {
        SubOut::new(self)
    }

    /// Pipes this command into another, producing a two-stage pipeline.
    pub fn pipe(self, other: Command) -> Pipeline {
        Pipeline::new([Runnable::Command(self), Runnable::Command(other)])
    }

    pub fn args_slice(&self) -> &[Arg] {
        &self.args
    }

    pub fn redirects_slice(&self) -> &[Redirect] {
        &self.redirects
    }

    pub fn env_slice(&self) -> &[EnvVar] {
        &self.env
    }

    pub fn cwd_path(&self) -> Option<&Path> {
        self.cwd.as_deref().map(|p| p.as_path())
    }

    pub fn unix_options(&self) -> &UnixOptions {
        &self.unix
    }

    /// Executes this command and returns the pipefail exit code.
    pub async fn run(&self) -> crate::Result<i32> {
        crate::runtime::run(&Runnable::Command(self.clone())).await
    }

    /// Executes this command and returns its captured stdout.
    pub async fn out(&self) -> crate::Result<Vec<u8>> {
        crate::runtime::out(&Runnable::Command(self.clone())).await
    }

    /// Executes this command and returns its captured stdout decoded as
    /// UTF-8.
    pub async fn out_str(&self) -> crate::Result<String> {
        Ok(String::from_utf8(self.out().await?)?)
    }
}

/// A flat, ordered sequence of [`Command`]s. Constructing a `Pipeline` from
/// values that include other `Pipeline`s flattens them automatically — a
/// `Pipeline` never nests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pipeline {
    stages: Arc<Vec<Command>>,
}

impl Pipeline {
    /// Builds a pipeline from an ordered sequence of stages, flattening any
    /// nested pipelines.
    pub fn new<I: IntoIterator<Item = Runnable>>(stages: I) -> Self {
        let mut flat = Vec::new();
        for stage in stages {
            match stage {
                Runnable::Command(cmd) => flat.push(cmd),
                Runnable::Pipeline(pipeline) => flat.extend((*pipeline.stages).clone()),
            }
        }
        Pipeline {
            stages: Arc::new(flat),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn pipe(mut self, other: Command) -> Self {
        Arc::make_mut(&mut self.stages).push(other);
        self
    }

    pub fn stages(&self) -> &[Command] {
        &self.stages
    }

    /// Reads `fd` (default [`STDIN`]) of the first stage from a file or
    /// input substitution.
    #[must_use]
    pub fn read(mut self, src: impl Into<ReadSrc>) -> Self {
        if let Some(first) = Arc::make_mut(&mut self.stages).first_mut() {
            take_mut(first, |c| c.read(src));
        }
        self
    }

    /// Writes `fd` (default [`STDOUT`]) of the last stage to a file or
    /// output substitution.
    #[must_use]
    pub fn write(mut self, dst: impl Into<WriteDst>) -> Self {
        if let Some(last) = Arc::make_mut(&mut self.stages).last_mut() {
            take_mut(last, |c| c.write(dst));
        }
        self
    }

    /// Appends the last stage's output (default [`STDOUT`]) to a file.
    #[must_use]
    pub fn append(mut self, dst: impl Into<WriteDst>) -> Self {
        if let Some(last) = Arc::make_mut(&mut self.stages).last_mut() {
            take_mut(last, |c| c.append(dst));
        }
        self
    }

    /// Feeds literal data into the first stage's `fd` (default [`STDIN`]).
    #[must_use]
    pub fn feed(mut self, data: impl Into<Data>) -> Self {
        if let Some(first) = Arc::make_mut(&mut self.stages).first_mut() {
            take_mut(first, |c| c.feed(data));
        }
        self
    }

    /// Closes `fd` on the last stage.
    #[must_use]
    pub fn close_fd(mut self, fd: i32) -> Self {
        if let Some(last) = Arc::make_mut(&mut self.stages).last_mut() {
            take_mut(last, |c| c.close_fd(fd));
        }
        self
    }

    /// Executes this pipeline and returns the pipefail exit code.
    pub async fn run(&self) -> crate::Result<i32> {
        crate::runtime::run(&Runnable::Pipeline(self.clone())).await
    }

    /// Executes this pipeline and returns the last stage's captured stdout.
    pub async fn out(&self) -> crate::Result<Vec<u8>> {
        crate::runtime::out(&Runnable::Pipeline(self.clone())).await
    }

    /// Executes this pipeline and returns its captured stdout decoded as
    /// UTF-8.
    pub async fn out_str(&self) -> crate::Result<String> {
        Ok(String::from_utf8(self.out().await?)?)
    }
}

/// Replaces `*slot` with `f(slot.clone())` without requiring `Command: Default`.
fn take_mut(slot: &mut Command, f: impl FnOnce(Command) -> Command) {
    let taken = slot.clone();
    *slot = f(taken);
}

/// The sum type executed by the runtime: a single command or a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runnable {
    Command(Command),
    Pipeline(Pipeline),
}

impl From<Command> for Runnable {
    fn from(cmd: Command) -> Self {
        Runnable::Command(cmd)
    }
}

impl From<Pipeline> for Runnable {
    fn from(pipeline: Pipeline) -> Self {
        Runnable::Pipeline(pipeline)
    }
}

impl Runnable {
    /// Executes this runnable and returns the pipefail exit code.
    pub async fn run(&self) -> crate::Result<i32> {
        crate::runtime::run(self).await
    }

    /// Executes this runnable and returns its captured stdout.
    pub async fn out(&self) -> crate::Result<Vec<u8>> {
        crate::runtime::out(self).await
    }

    /// Executes this runnable and returns its captured stdout decoded as
    /// UTF-8.
    pub async fn out_str(&self) -> crate::Result<String> {
        Ok(String::from_utf8(self.out().await?)?)
    }
}

/// Creates a command from positional arguments.
pub fn cmd(program: impl Into<String>) -> Command {
    Command::new(program)
}

/// Flattens nested pipelines/commands into a single stage list.
pub fn pipeline<I, R>(stages: I) -> Pipeline
where
    I: IntoIterator<Item = R>,
    R: Into<Runnable>,
{
    Pipeline::new(stages.into_iter().map(Into::into))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builders_are_value_immutable() {
        let base = Command::new("echo");
        let modified = base.clone().arg("hi");
        assert_ne!(base, modified);
        assert_eq!(base, Command::new("echo"));
    }

    #[test]
    fn pipeline_flattens_nested_pipelines() {
        let a = Command::new("a");
        let b = Command::new("b");
        let c = Command::new("c");
        let inner = Pipeline::new([Runnable::Command(a.clone()), Runnable::Command(b.clone())]);
        let outer = pipeline([Runnable::Pipeline(inner), Runnable::Command(c.clone())]);
        assert_eq!(outer.stages(), &[a, b, c]);
    }

    #[test]
    fn empty_pipeline_is_legal() {
        let p = Pipeline::new(std::iter::empty());
        assert!(p.stages().is_empty());
    }

    #[test]
    fn single_stage_pipeline_has_one_stage() {
        let c = Command::new("true");
        let p = Pipeline::new([Runnable::Command(c.clone())]);
        assert_eq!(p.stages(), &[c]);
    }

    #[test]
    fn redirect_order_is_preserved() {
        let cmd = Command::new("x").dup_fd(1, 2).write_fd(1, "/tmp/f", false);
        match cmd.redirects_slice() {
            [Redirect::FdToFd { src: 1, dst: 2 }, Redirect::FdToFile { fd: 1, append: false, .. }] => {}
            other => panic!("unexpected redirect order: {other:?}"),
        }
    }

    #[test]
    fn pipe_builds_two_stage_pipeline() {
        let p = Command::new("a").pipe(Command::new("b"));
        assert_eq!(p.stages().len(), 2);
    }
}
