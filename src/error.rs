//! Error types for runner operations.

use crate::consumer::ConsumeError;
use crate::line_source::StreamKind;
use std::borrow::Cow;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors detected while validating [crate::RunParameters].
///
/// These are reported synchronously and never enter a runner's error log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    /// No executable was given.
    #[error("must specify the path of an executable")]
    MissingExecutable,

    /// No output sentinel consumer was given.
    #[error("must specify an output sentinel")]
    MissingOutputSentinel,

    /// The output and error sentinels would issue the same command.
    #[error("the output and error sentinel commands must differ, both are {command:?}")]
    IdenticalSentinelCommands {
        /// The shared command text.
        command: String,
    },

    /// The command terminator is not a single ASCII character.
    #[error("command terminator {terminator:#04x} is not an ASCII character")]
    NonAsciiTerminator {
        /// The offending byte.
        terminator: u8,
    },
}

/// Which sentinel a round was still waiting for when it timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitedSentinel {
    /// The output sentinel has no command; the subprocess' own prompt is the signal.
    Prompt,

    /// Output of the given sentinel command.
    Command(String),
}

impl std::fmt::Display for AwaitedSentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AwaitedSentinel::Prompt => write!(f, "prompt"),
            AwaitedSentinel::Command(command) => {
                write!(f, "output from sentinel command {command:?}")
            }
        }
    }
}

/// An infrastructure failure.
///
/// Every value of this type that a runner produces is also recorded in its
/// [crate::ErrorLog], after which the runner refuses further work.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    /// The subprocess could not be started.
    #[error("trying to start '{process_name}': {source}")]
    SpawnFailed {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A standard stream of the freshly spawned child was not captured.
    #[error("getting {stream} for '{process_name}' failed, stream was not piped")]
    MissingPipe {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The missing stream: "stdin", "stdout" or "stderr".
        stream: &'static str,
    },

    /// Writing a command to the subprocess' stdin failed.
    #[error("writing command {command:?} failed: {source}")]
    WriteFailed {
        /// The normalized command text.
        command: String,
        /// The underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Flushing and closing the subprocess' stdin failed.
    #[error("closing stdin of '{process_name}' failed: {source}")]
    CloseFailed {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A stream ended before its sentinel showed up, typically because the subprocess died.
    #[error("{stream} closed while or before running {command:?}, no sentinel detected")]
    StreamClosed {
        /// The stream that closed.
        stream: StreamKind,
        /// The command of interest in that round.
        command: String,
    },

    /// The round deadline passed before all sentinels were detected.
    #[error("in command {command:?}, time {timeout:?} expired before detection of {awaited}")]
    Timeout {
        /// The command of interest in that round.
        command: String,
        /// The deadline that was exceeded.
        timeout: Duration,
        /// What the round was still waiting for.
        awaited: AwaitedSentinel,
    },

    /// A consumer reported a catastrophe.
    #[error("consumer of {stream} failed: {source}")]
    ConsumerFailed {
        /// The stream whose line was being consumed.
        stream: StreamKind,
        /// The consumer's error.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A consumer panicked while holding its lock in an earlier call.
    #[error("consumer lock is poisoned")]
    ConsumerPoisoned,

    /// A line handed to a consumer contains a line-feed.
    #[error("internal framing violation on {stream}: line {line:?} contains a line-feed")]
    FramingViolation {
        /// The stream the line came from.
        stream: StreamKind,
        /// The offending line.
        line: String,
    },

    /// Reading one of the subprocess' output streams failed.
    #[error("reading {stream} failed: {source}")]
    StreamReadFailed {
        /// The stream that failed.
        stream: StreamKind,
        /// The underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A single line exceeded the configured maximum length.
    #[error("{stream} produced a line longer than {max_line_length} bytes")]
    LineTooLong {
        /// The stream that produced the line.
        stream: StreamKind,
        /// The configured maximum.
        max_line_length: usize,
    },

    /// The subprocess exited unsuccessfully.
    #[error("subprocess '{process_name}' returned {status}")]
    ProcessExited {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The exit status.
        status: ExitStatus,
    },

    /// Waiting for the subprocess to exit failed.
    #[error("waiting for subprocess '{process_name}' failed: {source}")]
    WaitFailed {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Waiting for sentinels was requested although no command was issued.
    #[error("nothing is running")]
    NothingRunning,

    /// The future of a round was dropped before its sentinels were seen.
    ///
    /// Output of the abandoned command may still arrive, so later rounds cannot be trusted.
    #[error("round of command {command:?} was abandoned before completion")]
    RoundAbandoned {
        /// The command of interest in that round.
        command: String,
    },

    /// A stream watcher task could not be joined.
    #[error("{stream} watcher task failed: {reason}")]
    WatcherFailed {
        /// The stream the watcher was reading.
        stream: StreamKind,
        /// Rendered join error.
        reason: String,
    },
}

impl RunnerError {
    pub(crate) fn consumer_failed(stream: StreamKind, source: ConsumeError) -> Self {
        RunnerError::ConsumerFailed {
            stream,
            source: Arc::from(source),
        }
    }
}

/// Errors returned from [crate::ProcessRunner::run_round].
#[derive(Debug, Clone, Error)]
pub enum RoundError {
    /// The runner saw an infrastructure failure earlier and cannot be used anymore.
    #[error("subprocess '{process_name}' in error state, cannot recover (last error: {cause})")]
    Unusable {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The most recently logged error.
        cause: RunnerError,
    },

    /// Another round is outstanding.
    #[error("subprocess '{process_name}' is already running something")]
    AlreadyRunning {
        /// The name of the process.
        process_name: Cow<'static, str>,
    },

    /// [crate::ProcessRunner::close] was called and the subprocess has not exited yet.
    #[error("subprocess '{process_name}' is shutting down")]
    ShuttingDown {
        /// The name of the process.
        process_name: Cow<'static, str>,
    },

    /// The round itself failed. The runner is now unusable.
    #[error(transparent)]
    Failed(#[from] RunnerError),
}

/// Errors returned from [crate::ProcessRunner::close].
#[derive(Debug, Clone, Error)]
pub enum CloseError {
    /// The runner is in its error state.
    #[error("cannot close subprocess '{process_name}' in error state (last error: {cause})")]
    Unusable {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The most recently logged error.
        cause: RunnerError,
    },

    /// A round is outstanding and cannot be interrupted.
    #[error("cannot interrupt the running command of subprocess '{process_name}'")]
    Running {
        /// The name of the process.
        process_name: Cow<'static, str>,
    },

    /// Sending the exit command or closing stdin failed.
    #[error(transparent)]
    Failed(#[from] RunnerError),
}

/// Errors that can occur when terminating an abandoned subprocess.
#[derive(Debug, Error)]
pub enum TerminationError {
    /// Failed to send the interrupt signal.
    #[error("Failed to send interrupt signal to process '{process_name}': {source}")]
    SignallingFailed {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The subprocess did not exit, even after being killed.
    #[error(
        "Failed to terminate process '{process_name}'. It was still alive {timeout:?} after being killed"
    )]
    TerminationFailed {
        /// The name of the process.
        process_name: Cow<'static, str>,
        /// How long we waited after killing it.
        timeout: Duration,
    },
}
