use crate::consumer::SharedConsumer;
use crate::consumers::DiscardingConsumer;
use crate::error::{CloseError, RoundError, RunnerError, TerminationError};
use crate::error_log::ErrorLog;
use crate::line_source::{LineSource, StreamKind, spawn_line_source};
use crate::parameters::RunParameters;
use crate::sentinel_filter::{DEFAULT_ROUND_TIMEOUT, SentinelFilter, consumer_command};
use crate::signal;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Lifecycle phase of a [ProcessRunner].
///
/// Never stored. Derived from the error log, the presence of a subprocess and whether a round is
/// outstanding, every time it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    /// No subprocess exists. The next round starts one.
    Uninitialized,

    /// A subprocess exists and awaits the next command.
    Idle,

    /// A round is outstanding.
    Running,

    /// An infrastructure failure was logged. Terminal.
    Error,
}

impl Display for RunnerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Uninitialized => write!(f, "uninitialized"),
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Error => write!(f, "error"),
        }
    }
}

/// [RunnerState], carrying the error that caused the error state.
enum Phase {
    Uninitialized,
    Idle,
    Running,
    Error(RunnerError),
}

fn derive_phase(last_error: Option<RunnerError>, has_process: bool, running: bool) -> Phase {
    match (last_error, has_process, running) {
        (Some(cause), _, _) => Phase::Error(cause),
        (None, false, _) => Phase::Uninitialized,
        (None, true, true) => Phase::Running,
        (None, true, false) => Phase::Idle,
    }
}

/// What the runner knows about the live subprocess. Cleared by the supervisor once the process
/// exited and both streams were drained.
struct ProcessSlot {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

/// Everything a round needs from the current subprocess.
struct Session {
    /// `None` once [ProcessRunner::close] was called.
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    out: LineSource,
    err: LineSource,
}

/// Drives an interactive command-line subprocess, one command at a time.
///
/// Each round writes a command to the subprocess' stdin, followed by sentinel commands whose
/// output marks the end of the command's output. Lines the command produced on stdout and stderr
/// are handed to the round's consumer.
///
/// Any infrastructure failure renders the runner unusable. Construct a new one to recover.
///
/// # Examples
///
/// ```no_run
/// use sentinel_runner::{
///     HoardingConsumer, ProcessRunner, RunParameters, SentinelConsumer, shared,
/// };
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let params = RunParameters::builder("/bin/sh")
///     .output_sentinel(shared(SentinelConsumer::new("echo X_MARK", "X_MARK")))
///     .exit_command("exit")
///     .build()?;
/// let runner = ProcessRunner::new(params);
///
/// let listing = shared(HoardingConsumer::new("ls /"));
/// runner.run_round(listing.clone(), Duration::from_secs(1)).await?;
/// println!("{}", listing.lock().unwrap().result());
///
/// runner.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ProcessRunner {
    params: RunParameters,
    filter: SentinelFilter,
    errors: Arc<ErrorLog>,
    process: Arc<std::sync::Mutex<Option<ProcessSlot>>>,

    /// Receives the exit status of the current subprocess.
    exited: std::sync::Mutex<Option<oneshot::Receiver<Option<ExitStatus>>>>,

    /// Guards each state decision and the hand-off to the sentinel filter. Never held while
    /// waiting for sentinels.
    session: Mutex<Option<Session>>,
}

impl Debug for ProcessRunner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("params", &self.params)
            .field("filter", &self.filter)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProcessRunner {
    /// Creates a runner. The subprocess is started lazily, by the first round.
    pub fn new(params: RunParameters) -> Self {
        let filter = SentinelFilter::new(
            params.name.clone(),
            params.output_sentinel.clone(),
            params.error_sentinel.clone(),
            params.command_terminator,
            params.command_echo,
        );
        Self {
            params,
            filter,
            errors: Arc::new(ErrorLog::new()),
            process: Arc::new(std::sync::Mutex::new(None)),
            exited: std::sync::Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// The current lifecycle phase. Can be called while a round is in flight.
    pub fn state(&self) -> RunnerState {
        match self.phase() {
            Phase::Uninitialized => RunnerState::Uninitialized,
            Phase::Idle => RunnerState::Idle,
            Phase::Running => RunnerState::Running,
            Phase::Error(_) => RunnerState::Error,
        }
    }

    /// The most recently logged infrastructure failure.
    pub fn last_error(&self) -> Option<RunnerError> {
        self.errors.last_error()
    }

    /// All infrastructure failures logged so far, oldest first.
    pub fn errors(&self) -> Vec<RunnerError> {
        self.errors.errors()
    }

    /// Runs `command`, discarding its output, with the default timeout.
    pub async fn run_discarding(&self, command: impl Into<String>) -> Result<(), RoundError> {
        let consumer = crate::consumer::shared(DiscardingConsumer::new(command));
        self.run_round(consumer, DEFAULT_ROUND_TIMEOUT).await
    }

    /// Issues `consumer`'s command, then the sentinel commands, and waits until the sentinels
    /// are seen or `timeout` passed. A zero `timeout` selects [DEFAULT_ROUND_TIMEOUT].
    ///
    /// Starts the subprocess if necessary. Every line the command produced before the sentinels
    /// is handed to `consumer`.
    ///
    /// Any error returned, other than [RoundError::AlreadyRunning] or
    /// [RoundError::ShuttingDown], leaves the runner unusable.
    pub async fn run_round(
        &self,
        consumer: SharedConsumer,
        timeout: Duration,
    ) -> Result<(), RoundError> {
        let mut session = self.session.lock().await;
        match self.phase() {
            Phase::Error(cause) => {
                return Err(RoundError::Unusable {
                    process_name: self.params.name.clone(),
                    cause,
                });
            }
            Phase::Running => {
                return Err(RoundError::AlreadyRunning {
                    process_name: self.params.name.clone(),
                });
            }
            Phase::Uninitialized => {
                *session = Some(self.errors.log_err(self.start())?);
            }
            Phase::Idle => {}
        }

        let Some(current) = session.as_ref() else {
            return Err(RoundError::ShuttingDown {
                process_name: self.params.name.clone(),
            });
        };
        let mut stdin = current.stdin.clone().lock_owned().await;
        let Some(sink) = stdin.as_mut() else {
            return Err(RoundError::ShuttingDown {
                process_name: self.params.name.clone(),
            });
        };
        let (out, err) = (current.out.clone(), current.err.clone());

        let command = self.errors.log_err(consumer_command(&consumer))?;

        // The write below may block on a full pipe. Dropping the round there must not leave the
        // filter running.
        let mut abandoned = AbandonedRound {
            filter: &self.filter,
            errors: &self.errors,
            command: Some(command),
        };
        if let Err(err) = self.filter.begin_run(consumer, &mut *sink).await {
            abandoned.disarm();
            self.filter.reset();
            self.errors.log(err.clone());
            return Err(RoundError::Failed(err));
        }

        // Running from here on. Let others observe the state while we wait.
        drop(session);

        let result = self.filter.wait(&mut *sink, &out, &err, timeout).await;
        abandoned.disarm();
        self.errors.log_err(result)?;
        Ok(())
    }

    /// Sends the exit command, if any, and closes the subprocess' stdin.
    ///
    /// Does not wait for the subprocess to exit. Only permitted while [RunnerState::Idle].
    /// Closing an uninitialized runner, or closing twice, does nothing.
    pub async fn close(&self) -> Result<(), CloseError> {
        let session = self.session.lock().await;
        match self.phase() {
            Phase::Error(cause) => Err(CloseError::Unusable {
                process_name: self.params.name.clone(),
                cause,
            }),
            Phase::Running => Err(CloseError::Running {
                process_name: self.params.name.clone(),
            }),
            Phase::Uninitialized => Ok(()),
            Phase::Idle => {
                let Some(current) = session.as_ref() else {
                    return Ok(());
                };
                let Some(mut sink) = current.stdin.lock().await.take() else {
                    tracing::debug!(process = %self.params.name, "Subprocess is already closing");
                    return Ok(());
                };
                if let Some(exit_command) = &self.params.exit_command {
                    self.errors
                        .log_err(self.filter.issue_command(exit_command, &mut sink).await)?;
                }
                let closed = sink.shutdown().await.map_err(|source| RunnerError::CloseFailed {
                    process_name: self.params.name.clone(),
                    source: Arc::new(source),
                });
                self.errors.log_err(closed)?;
                drop(sink);
                tracing::debug!(process = %self.params.name, "Closed stdin of subprocess");
                Ok(())
            }
        }
    }

    /// Abandons the subprocess, whatever it is doing.
    ///
    /// Sends an interrupt signal (SIGINT / CTRL_C_EVENT) and waits up to `interrupt_timeout` for
    /// the subprocess to exit. If it does not, it is killed and given `kill_timeout` to exit.
    ///
    /// Returns `Ok(None)` if there is no subprocess or its exit status could not be determined.
    pub async fn terminate(
        self,
        interrupt_timeout: Duration,
        kill_timeout: Duration,
    ) -> Result<Option<ExitStatus>, TerminationError> {
        let Some(mut exited) = lock(&self.exited).take() else {
            return Ok(None);
        };

        let pid = lock(&self.process).as_ref().and_then(|slot| slot.pid);
        if let Some(pid) = pid {
            if let Err(source) = signal::send_interrupt(pid) {
                // The process may have exited in the meantime.
                return match exited.try_recv() {
                    Ok(status) => Ok(status),
                    Err(_not_yet) => Err(TerminationError::SignallingFailed {
                        process_name: self.params.name.clone(),
                        source,
                    }),
                };
            }
        }

        match tokio::time::timeout(interrupt_timeout, &mut exited).await {
            Ok(status) => return Ok(status.unwrap_or(None)),
            Err(_elapsed) => {
                tracing::warn!(
                    process = %self.params.name,
                    timeout = ?interrupt_timeout,
                    "Subprocess ignored the interrupt, killing it"
                );
            }
        }

        let kill = lock(&self.process)
            .as_mut()
            .and_then(|slot| slot.kill.take());
        if let Some(kill) = kill {
            // The supervisor only goes away after the process exited.
            let _res = kill.send(());
        }

        match tokio::time::timeout(kill_timeout, &mut exited).await {
            Ok(status) => Ok(status.unwrap_or(None)),
            Err(_elapsed) => Err(TerminationError::TerminationFailed {
                process_name: self.params.name.clone(),
                timeout: kill_timeout,
            }),
        }
    }

    fn phase(&self) -> Phase {
        derive_phase(
            self.errors.last_error(),
            lock(&self.process).is_some(),
            self.filter.is_running(),
        )
    }

    fn start(&self) -> Result<Session, RunnerError> {
        let name = &self.params.name;
        let mut command = Command::new(&self.params.path);
        command
            .args(&self.params.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.params.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|source| RunnerError::SpawnFailed {
                process_name: name.clone(),
                source: Arc::new(source),
            })?;
        let missing_pipe = |stream| RunnerError::MissingPipe {
            process_name: name.clone(),
            stream,
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let pid = child.id();

        let stdout_options = self.params.stdout_options;
        let stderr_options = self.params.stderr_options;
        let (out_tx, out) = LineSource::channel(StreamKind::StdOut, stdout_options.channel_capacity);
        let (err_tx, err) = LineSource::channel(StreamKind::StdErr, stderr_options.channel_capacity);
        let out_reader = spawn_line_source(
            stdout,
            StreamKind::StdOut,
            None,
            stdout_options,
            out_tx.clone(),
            self.errors.clone(),
        );
        let err_reader = spawn_line_source(
            stderr,
            StreamKind::StdErr,
            self.params.error_prefix.clone(),
            stderr_options,
            err_tx,
            self.errors.clone(),
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = oneshot::channel();
        *lock(&self.process) = Some(ProcessSlot {
            pid,
            kill: Some(kill_tx),
        });
        *lock(&self.exited) = Some(exited_rx);

        tokio::spawn(supervise(Supervisor {
            process_name: name.clone(),
            child,
            kill: kill_rx,
            exited: exited_tx,
            readers: [out_reader, err_reader],
            out_tx,
            errors: self.errors.clone(),
            process: self.process.clone(),
        }));

        tracing::debug!(process = %name, pid, "Started subprocess");
        Ok(Session {
            stdin: Arc::new(Mutex::new(Some(stdin))),
            out,
            err,
        })
    }
}

/// Logs an abandoned round and resets the filter, should the future of
/// [ProcessRunner::run_round] be dropped while writing the command or waiting for sentinels.
struct AbandonedRound<'a> {
    filter: &'a SentinelFilter,
    errors: &'a ErrorLog,
    command: Option<String>,
}

impl AbandonedRound<'_> {
    fn disarm(&mut self) {
        self.command = None;
    }
}

impl Drop for AbandonedRound<'_> {
    fn drop(&mut self) {
        if let Some(command) = self.command.take() {
            self.errors.log(RunnerError::RoundAbandoned {
                command: command.trim_end().to_owned(),
            });
            self.filter.reset();
        }
    }
}

struct Supervisor {
    process_name: Cow<'static, str>,
    child: Child,
    kill: oneshot::Receiver<()>,
    exited: oneshot::Sender<Option<ExitStatus>>,
    readers: [JoinHandle<()>; 2],

    /// Keeps the stdout channel open until the process exited and both readers are done.
    out_tx: mpsc::Sender<String>,

    errors: Arc<ErrorLog>,
    process: Arc<std::sync::Mutex<Option<ProcessSlot>>>,
}

/// Waits for the subprocess to exit, then for both stream readers to drain, and finally forgets
/// the subprocess.
async fn supervise(supervisor: Supervisor) {
    let Supervisor {
        process_name,
        mut child,
        mut kill,
        exited,
        readers,
        out_tx,
        errors,
        process,
    } = supervisor;

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill => {
            tracing::warn!(process = %process_name, "Killing subprocess");
            if let Err(err) = child.start_kill() {
                tracing::warn!(process = %process_name, %err, "Failed to kill subprocess");
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) if status.success() => {
            tracing::debug!(process = %process_name, %status, "Subprocess exited");
            Some(status)
        }
        Ok(status) => {
            errors.log(RunnerError::ProcessExited {
                process_name: process_name.clone(),
                status,
            });
            Some(status)
        }
        Err(err) => {
            errors.log(RunnerError::WaitFailed {
                process_name: process_name.clone(),
                source: Arc::new(err),
            });
            None
        }
    };
    // Nobody may be waiting.
    let _res = exited.send(status);

    for reader in readers {
        if let Err(err) = reader.await {
            tracing::warn!(process = %process_name, %err, "Stream reader did not finish cleanly");
        }
    }
    drop(out_tx);
    *lock(&process) = None;
    tracing::debug!(process = %process_name, "Subprocess is gone");
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
