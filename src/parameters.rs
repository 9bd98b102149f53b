//! Builder API for describing the subprocess a [crate::ProcessRunner] drives.

use crate::consumer::SharedConsumer;
use crate::error::ParameterError;
use crate::line_source::LineSourceOptions;
use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Validated, immutable configuration of one subprocess.
///
/// Constant for the lifetime of every subprocess a runner starts from it.
pub struct RunParameters {
    pub(crate) path: PathBuf,
    pub(crate) args: Vec<OsString>,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) exit_command: Option<String>,
    pub(crate) error_prefix: Option<String>,
    pub(crate) command_terminator: Option<u8>,
    pub(crate) output_sentinel: SharedConsumer,
    pub(crate) error_sentinel: Option<SharedConsumer>,
    pub(crate) name: Cow<'static, str>,
    pub(crate) command_echo: Option<Level>,
    pub(crate) stdout_options: LineSourceOptions,
    pub(crate) stderr_options: LineSourceOptions,
}

impl Debug for RunParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunParameters")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("exit_command", &self.exit_command)
            .field("error_prefix", &self.error_prefix)
            .field("command_terminator", &self.command_terminator)
            .field("output_sentinel", &"non-debug < SharedConsumer >")
            .field(
                "error_sentinel",
                &self
                    .error_sentinel
                    .as_ref()
                    .map(|_| "non-debug < SharedConsumer >"),
            )
            .field("name", &self.name)
            .field("command_echo", &self.command_echo)
            .field("stdout_options", &self.stdout_options)
            .field("stderr_options", &self.stderr_options)
            .finish()
    }
}

impl RunParameters {
    /// Starts describing a subprocess running the executable at `path`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sentinel_runner::{RunParameters, SentinelConsumer, shared};
    ///
    /// let params = RunParameters::builder("/bin/sh")
    ///     .output_sentinel(shared(SentinelConsumer::new("echo X_MARK", "X_MARK")))
    ///     .error_sentinel(shared(SentinelConsumer::new("echo E_MARK 1>&2", "E_MARK")))
    ///     .exit_command("exit")
    ///     .build()?;
    /// # Ok::<_, sentinel_runner::ParameterError>(())
    /// ```
    pub fn builder(path: impl Into<PathBuf>) -> RunParametersBuilder {
        RunParametersBuilder::new(path)
    }

    /// The name attached to every log event and error concerning this subprocess.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Consuming builder for [RunParameters].
pub struct RunParametersBuilder {
    path: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    exit_command: Option<String>,
    error_prefix: Option<String>,
    command_terminator: Option<u8>,
    output_sentinel: Option<SharedConsumer>,
    error_sentinel: Option<SharedConsumer>,
    name: Option<Cow<'static, str>>,
    command_echo: Option<Level>,
    stdout_options: LineSourceOptions,
    stderr_options: LineSourceOptions,
}

impl RunParametersBuilder {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            working_dir: None,
            exit_command: None,
            error_prefix: None,
            command_terminator: None,
            output_sentinel: None,
            error_sentinel: None,
            name: None,
            command_echo: None,
            stdout_options: LineSourceOptions::default(),
            stderr_options: LineSourceOptions::stderr_default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Directory to start the subprocess in. Defaults to the current directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Required. Its command is issued after every command of interest. Once its
    /// [crate::OutputConsumer::succeeded] reports `true`, stdout is considered complete.
    ///
    /// Give it an empty command to rely on the subprocess' prompt instead.
    pub fn output_sentinel(mut self, sentinel: SharedConsumer) -> Self {
        self.output_sentinel = Some(sentinel);
        self
    }

    /// Like [RunParametersBuilder::output_sentinel], but for stderr.
    ///
    /// Without one, stderr is merely passed through to the consumer of the running command.
    pub fn error_sentinel(mut self, sentinel: SharedConsumer) -> Self {
        self.error_sentinel = Some(sentinel);
        self
    }

    /// Sent by [crate::ProcessRunner::close] before closing stdin, e.g. `"quit"`.
    pub fn exit_command(mut self, command: impl Into<String>) -> Self {
        self.exit_command = Some(command.into());
        self
    }

    /// Prepended to every stderr line, e.g. `"ERR: "`.
    pub fn error_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.error_prefix = Some(prefix.into());
        self
    }

    /// Appended to every command not already ending in it, e.g. `b';'` for SQL shells.
    ///
    /// `0` means no terminator.
    pub fn command_terminator(mut self, terminator: u8) -> Self {
        self.command_terminator = match terminator {
            0 => None,
            terminator => Some(terminator),
        };
        self
    }

    /// Sets an explicit process name. Defaults to the executable followed by its quoted
    /// arguments, e.g. `sqlite3 "-batch"`.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Log every command written to the subprocess at `level`. `None` (the default) disables
    /// the echo.
    pub fn command_echo(mut self, level: Option<Level>) -> Self {
        self.command_echo = level;
        self
    }

    pub fn stdout_options(mut self, options: LineSourceOptions) -> Self {
        self.stdout_options = options;
        self
    }

    pub fn stderr_options(mut self, options: LineSourceOptions) -> Self {
        self.stderr_options = options;
        self
    }

    pub fn build(self) -> Result<RunParameters, ParameterError> {
        if self.path.as_os_str().is_empty() {
            return Err(ParameterError::MissingExecutable);
        }
        let Some(output_sentinel) = self.output_sentinel else {
            return Err(ParameterError::MissingOutputSentinel);
        };
        if let Some(error_sentinel) = &self.error_sentinel {
            let output_command = sentinel_command(&output_sentinel);
            if output_command == sentinel_command(error_sentinel) {
                return Err(ParameterError::IdenticalSentinelCommands {
                    command: output_command,
                });
            }
        }
        if let Some(terminator) = self.command_terminator {
            if !terminator.is_ascii() {
                return Err(ParameterError::NonAsciiTerminator { terminator });
            }
        }

        let name = match self.name {
            Some(name) => name,
            None => Cow::Owned(auto_name(&self.path, &self.args)),
        };

        Ok(RunParameters {
            path: self.path,
            args: self.args,
            working_dir: self.working_dir,
            exit_command: self.exit_command,
            error_prefix: self.error_prefix,
            command_terminator: self.command_terminator,
            output_sentinel,
            error_sentinel: self.error_sentinel,
            name,
            command_echo: self.command_echo,
            stdout_options: self.stdout_options,
            stderr_options: self.stderr_options,
        })
    }
}

fn sentinel_command(sentinel: &SharedConsumer) -> String {
    match sentinel.lock() {
        Ok(sentinel) => sentinel.command().to_owned(),
        Err(poisoned) => poisoned.into_inner().command().to_owned(),
    }
}

fn auto_name(path: &Path, args: &[OsString]) -> String {
    let mut name = path.to_string_lossy().into_owned();
    for arg in args {
        name.push_str(" \"");
        name.push_str(arg.to_string_lossy().as_ref());
        name.push('"');
    }
    name
}
