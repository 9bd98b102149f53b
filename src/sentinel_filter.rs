use crate::consumer::{OutputConsumer, SharedConsumer};
use crate::error::{AwaitedSentinel, RunnerError};
use crate::line_source::{LineSource, StreamKind};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::Level;

/// Used when a round is started with a zero timeout.
///
/// Short for a human, but long enough for simple, quick commands (the kind one wants as a
/// sentinel) to finish.
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(3);

const LINE_FEED: char = '\n';

/// Orchestrates the lifetime of one command.
///
/// Issues a command to the subprocess' stdin, follows up with zero, one or two sentinel commands
/// and watches stdout and stderr for the sentinel values these commands produce. Once they are
/// seen, the output of the command of interest must be complete.
pub(crate) struct SentinelFilter {
    process_name: Cow<'static, str>,

    /// The consumer of the current round. Both watchers write into it.
    consumer: Mutex<Option<SharedConsumer>>,

    /// Required, though its command may be empty to rely on the subprocess' prompt.
    output_sentinel: SharedConsumer,
    error_sentinel: Option<SharedConsumer>,

    terminator: Option<u8>,
    command_echo: Option<Level>,
    running: AtomicBool,
}

impl std::fmt::Debug for SentinelFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelFilter")
            .field("process_name", &self.process_name)
            .field("terminator", &self.terminator)
            .field("command_echo", &self.command_echo)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SentinelFilter {
    pub(crate) fn new(
        process_name: Cow<'static, str>,
        output_sentinel: SharedConsumer,
        error_sentinel: Option<SharedConsumer>,
        terminator: Option<u8>,
        command_echo: Option<Level>,
    ) -> Self {
        Self {
            process_name,
            consumer: Mutex::new(None),
            output_sentinel,
            error_sentinel,
            terminator,
            command_echo,
            running: AtomicBool::new(false),
        }
    }

    /// True between [SentinelFilter::begin_run] and the end of [SentinelFilter::wait].
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Binds `consumer` to this round and writes its command into `sink`.
    ///
    /// Does not wait for anything. Returns the command line actually sent.
    pub(crate) async fn begin_run<W: AsyncWrite + Unpin>(
        &self,
        consumer: SharedConsumer,
        sink: &mut W,
    ) -> Result<String, RunnerError> {
        let command = lock_consumer(&consumer)?.command().to_owned();
        *self.bound_consumer_slot() = Some(consumer);
        self.running.store(true, Ordering::Release);
        self.issue_command(&command, sink).await
    }

    /// Writes `command`, properly terminated, into `sink`. Empty commands are not sent.
    pub(crate) async fn issue_command<W: AsyncWrite + Unpin>(
        &self,
        command: &str,
        sink: &mut W,
    ) -> Result<String, RunnerError> {
        if command.is_empty() {
            return Ok(String::new());
        }
        let line = terminate_command_line(command, self.terminator);
        echo_command(self.command_echo, &self.process_name, &line);

        let written = async {
            sink.write_all(line.as_bytes()).await?;
            sink.flush().await
        };
        match written.await {
            Ok(()) => Ok(line),
            Err(err) => Err(RunnerError::WriteFailed {
                command: line,
                source: err.into(),
            }),
        }
    }

    /// Issues the sentinel commands and waits until the sentinels are seen on `out` (and `err`,
    /// if an error sentinel is configured) or `timeout` passes.
    ///
    /// Lines that are not sentinels go to the consumer given to [SentinelFilter::begin_run].
    /// The filter is reset afterward, no matter the outcome.
    pub(crate) async fn wait<W: AsyncWrite + Unpin>(
        &self,
        sink: &mut W,
        out: &LineSource,
        err: &LineSource,
        timeout: Duration,
    ) -> Result<(), RunnerError> {
        let Some(consumer) = self.bound_consumer_slot().clone() else {
            return Err(RunnerError::NothingRunning);
        };
        if !self.is_running() {
            return Err(RunnerError::NothingRunning);
        }
        let _reset = ResetOnDrop(self);

        let timeout = match timeout.is_zero() {
            true => DEFAULT_ROUND_TIMEOUT,
            false => timeout,
        };
        let command = lock_consumer(&consumer)?.command().to_owned();

        // Empty when the subprocess' own prompt is the signal.
        let output_sentinel_command = lock_consumer(&self.output_sentinel)?.command().to_owned();
        self.issue_command(&output_sentinel_command, sink).await?;

        // Should provoke harmless complaints on stderr, e.g. a non-existent command.
        if let Some(error_sentinel) = &self.error_sentinel {
            let error_sentinel_command = lock_consumer(error_sentinel)?.command().to_owned();
            self.issue_command(&error_sentinel_command, sink).await?;
        }

        let out_watcher = tokio::spawn(watch_for_sentinel(
            out.clone(),
            self.output_sentinel.clone(),
            consumer.clone(),
            command.clone(),
        ));
        let (err_watcher, stop_pass_through) = match &self.error_sentinel {
            Some(error_sentinel) => {
                let watcher = tokio::spawn(watch_for_sentinel(
                    err.clone(),
                    error_sentinel.clone(),
                    consumer.clone(),
                    command.clone(),
                ));
                (watcher, None)
            }
            None => {
                let (stop_tx, stop_rx) = oneshot::channel();
                let watcher = tokio::spawn(pass_through(err.clone(), consumer.clone(), stop_rx));
                (watcher, Some(stop_tx))
            }
        };
        let _abort = AbortOnDrop([out_watcher.abort_handle(), err_watcher.abort_handle()]);

        let completion = async move {
            let out_result = join_watcher(StreamKind::StdOut, out_watcher).await;
            if let Some(stop_pass_through) = stop_pass_through {
                // Fails only if the pass-through already saw its stream close.
                let _res = stop_pass_through.send(());
            }
            let err_result = join_watcher(StreamKind::StdErr, err_watcher).await;
            // A stdout failure takes precedence.
            out_result.and(err_result)
        };

        match tokio::time::timeout(timeout, completion).await {
            Ok(result) => {
                tracing::trace!(process = %self.process_name, command = %command, ?result, "Round ended");
                result
            }
            Err(_elapsed) => Err(RunnerError::Timeout {
                command,
                timeout,
                awaited: match output_sentinel_command.is_empty() {
                    true => AwaitedSentinel::Prompt,
                    false => AwaitedSentinel::Command(output_sentinel_command),
                },
            }),
        }
    }

    /// Marks the round as over, forgets its consumer and readies both sentinels for the next one.
    pub(crate) fn reset(&self) {
        self.running.store(false, Ordering::Release);
        *self.bound_consumer_slot() = None;
        reset_consumer(&self.output_sentinel);
        if let Some(error_sentinel) = &self.error_sentinel {
            reset_consumer(error_sentinel);
        }
    }

    fn bound_consumer_slot(&self) -> MutexGuard<'_, Option<SharedConsumer>> {
        match self.consumer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct ResetOnDrop<'a>(&'a SentinelFilter);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Watchers are left to nobody once a round timed out or was dropped. Stop them.
struct AbortOnDrop<const N: usize>([AbortHandle; N]);

impl<const N: usize> Drop for AbortOnDrop<N> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Reads `lines` until `sentinel` succeeds, handing every line before the sentinel to `consumer`.
async fn watch_for_sentinel(
    lines: LineSource,
    sentinel: SharedConsumer,
    consumer: SharedConsumer,
    command: String,
) -> Result<(), RunnerError> {
    let stream = lines.kind();
    let mut receiver = lines.lock().await;
    loop {
        let Some(line) = receiver.recv().await else {
            return Err(RunnerError::StreamClosed { stream, command });
        };
        check_framing(stream, &line)?;
        {
            let mut sentinel = lock_consumer(&sentinel)?;
            if !sentinel.succeeded() {
                sentinel
                    .consume(&line)
                    .map_err(|err| RunnerError::consumer_failed(stream, err))?;
            }
            if sentinel.succeeded() {
                tracing::trace!(%stream, line = %line, "Detected sentinel");
                return Ok(());
            }
        }
        forward_line(stream, &consumer, &line)?;
    }
}

/// Hands every line of `lines` to `consumer` until the stream closes or `stop` fires.
///
/// Lines already buffered when `stop` fires are still delivered.
async fn pass_through(
    lines: LineSource,
    consumer: SharedConsumer,
    mut stop: oneshot::Receiver<()>,
) -> Result<(), RunnerError> {
    let stream = lines.kind();
    let mut receiver = lines.lock().await;
    loop {
        tokio::select! {
            line = receiver.recv() => {
                match line {
                    Some(line) => {
                        check_framing(stream, &line)?;
                        forward_line(stream, &consumer, &line)?;
                    }
                    None => return Ok(()),
                }
            }
            _msg = &mut stop => {
                while let Ok(line) = receiver.try_recv() {
                    check_framing(stream, &line)?;
                    forward_line(stream, &consumer, &line)?;
                }
                return Ok(());
            }
        }
    }
}

async fn join_watcher(
    stream: StreamKind,
    watcher: JoinHandle<Result<(), RunnerError>>,
) -> Result<(), RunnerError> {
    match watcher.await {
        Ok(result) => result,
        Err(join_error) => Err(RunnerError::WatcherFailed {
            stream,
            reason: join_error.to_string(),
        }),
    }
}

/// Both watchers may call this concurrently. The consumer lock is held for this one line only.
fn forward_line(
    stream: StreamKind,
    consumer: &SharedConsumer,
    line: &str,
) -> Result<(), RunnerError> {
    lock_consumer(consumer)?
        .consume(line)
        .map_err(|err| RunnerError::consumer_failed(stream, err))
}

/// Lines never contain a line-feed. If one does, line splitting is broken.
fn check_framing(stream: StreamKind, line: &str) -> Result<(), RunnerError> {
    match line.contains(LINE_FEED) {
        false => Ok(()),
        true => Err(RunnerError::FramingViolation {
            stream,
            line: line.to_owned(),
        }),
    }
}

/// The command `consumer` wants issued, as given.
pub(crate) fn consumer_command(consumer: &SharedConsumer) -> Result<String, RunnerError> {
    Ok(lock_consumer(consumer)?.command().to_owned())
}

fn lock_consumer(
    consumer: &SharedConsumer,
) -> Result<MutexGuard<'_, dyn OutputConsumer + 'static>, RunnerError> {
    consumer.lock().map_err(|_| RunnerError::ConsumerPoisoned)
}

fn reset_consumer(consumer: &SharedConsumer) {
    match consumer.lock() {
        Ok(mut consumer) => consumer.reset(),
        Err(poisoned) => poisoned.into_inner().reset(),
    }
}

/// Assures that `command` ends in exactly one `terminator` (if any) followed by exactly one
/// line-feed.
pub(crate) fn terminate_command_line(command: &str, terminator: Option<u8>) -> String {
    let mut line = String::with_capacity(command.len() + 2);
    line.push_str(command.strip_suffix(LINE_FEED).unwrap_or(command));
    if let Some(terminator) = terminator.map(char::from) {
        if !line.ends_with(terminator) {
            line.push(terminator);
        }
    }
    line.push(LINE_FEED);
    line
}

fn echo_command(level: Option<Level>, process_name: &str, line: &str) {
    let Some(level) = level else {
        return;
    };
    let command = line.trim_end_matches(LINE_FEED);
    if level == Level::ERROR {
        tracing::error!(process = %process_name, command, "Issuing command");
    } else if level == Level::WARN {
        tracing::warn!(process = %process_name, command, "Issuing command");
    } else if level == Level::INFO {
        tracing::info!(process = %process_name, command, "Issuing command");
    } else if level == Level::DEBUG {
        tracing::debug!(process = %process_name, command, "Issuing command");
    } else {
        tracing::trace!(process = %process_name, command, "Issuing command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumeError, shared};
    use crate::consumers::{HoardingConsumer, SentinelConsumer};
    use assertr::prelude::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    struct Round {
        filter: SentinelFilter,
        output_sentinel: Arc<Mutex<SentinelConsumer>>,
        error_sentinel: Option<Arc<Mutex<SentinelConsumer>>>,
        out_tx: mpsc::Sender<String>,
        err_tx: mpsc::Sender<String>,
        out: LineSource,
        err: LineSource,
    }

    fn round(output_sentinel: SentinelConsumer, error_sentinel: Option<SentinelConsumer>) -> Round {
        let output_sentinel = shared(output_sentinel);
        let error_sentinel = error_sentinel.map(shared);
        let filter = SentinelFilter::new(
            "test".into(),
            output_sentinel.clone(),
            error_sentinel.clone().map(|s| s as SharedConsumer),
            None,
            Some(Level::DEBUG),
        );
        let (out_tx, out) = LineSource::channel(StreamKind::StdOut, 64);
        let (err_tx, err) = LineSource::channel(StreamKind::StdErr, 64);
        Round {
            filter,
            output_sentinel,
            error_sentinel,
            out_tx,
            err_tx,
            out,
            err,
        }
    }

    async fn send_all(tx: &mpsc::Sender<String>, lines: &[&str]) {
        for line in lines {
            tx.send(line.to_string()).await.unwrap();
        }
    }

    fn sorted(mut lines: Vec<String>) -> Vec<String> {
        lines.sort();
        lines
    }

    #[test]
    fn terminates_command_lines() {
        fn run_test_case(command: &str, terminator: Option<u8>, expected: &str) {
            assert_that(terminate_command_line(command, terminator))
                .with_detail_message(format!("Command: {command:?}, terminator: {terminator:?}"))
                .is_equal_to(expected.to_owned());
        }

        run_test_case("select 1", None, "select 1\n");
        run_test_case("select 1\n", None, "select 1\n");
        run_test_case("select 1", Some(b';'), "select 1;\n");
        run_test_case("select 1\n", Some(b';'), "select 1;\n");
        run_test_case("select 1;", Some(b';'), "select 1;\n");
        run_test_case("select 1;\n", Some(b';'), "select 1;\n");
        run_test_case("\n", None, "\n");
        run_test_case("\n", Some(b';'), ";\n");
    }

    #[tokio::test]
    async fn empty_command_is_not_written() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let mut sink = Vec::<u8>::new();
        let sent = r.filter.issue_command("", &mut sink).await.unwrap();
        assert_that(sent).is_equal_to(String::new());
        assert_that(sink).is_empty();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_at_output_sentinel() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let consumer = shared(HoardingConsumer::new("list limit 2"));
        let mut sink = Vec::<u8>::new();

        let sent = r.filter.begin_run(consumer.clone(), &mut sink).await.unwrap();
        assert_that(sent).is_equal_to("list limit 2\n".to_owned());
        assert_that(r.filter.is_running()).is_true();

        send_all(&r.out_tx, &["row1", "row2", "X_MARK", "row3"]).await;
        r.filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap();

        assert_that(consumer.lock().unwrap().lines()).contains_exactly(&["row1", "row2"]);
        assert_that(String::from_utf8(sink).unwrap())
            .is_equal_to("list limit 2\necho X_MARK\n".to_owned());
        assert_that(r.filter.is_running()).is_false();
        assert_that(r.output_sentinel.lock().unwrap().succeeded()).is_false();

        // The line after the sentinel belongs to the next round.
        let next = r.out.lock().await.recv().await;
        assert_that(next).is_some().is_equal_to("row3".to_owned());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collects_both_streams_up_to_their_sentinels() {
        let r = round(
            SentinelConsumer::new("echo X_MARK", "X_MARK"),
            Some(SentinelConsumer::new("blahblah", "unknown command: blahblah")),
        );
        let consumer = shared(HoardingConsumer::new("query limit 5"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer.clone(), &mut sink).await.unwrap();
        send_all(&r.err_tx, &["error! row 4", "unknown command: blahblah", "late"]).await;
        send_all(&r.out_tx, &["row1", "row2", "row3", "X_MARK"]).await;
        r.filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap();

        let lines = consumer.lock().unwrap().result().lines().map(String::from).collect();
        assert_that(sorted(lines)).is_equal_to(sorted(vec![
            "row1".to_owned(),
            "row2".to_owned(),
            "row3".to_owned(),
            "error! row 4".to_owned(),
        ]));
        assert_that(String::from_utf8(sink).unwrap())
            .is_equal_to("query limit 5\necho X_MARK\nblahblah\n".to_owned());
        let error_sentinel = r.error_sentinel.as_ref().unwrap().lock().unwrap().clone();
        assert_that(error_sentinel.succeeded()).is_false();
        assert_that(error_sentinel.matched_line()).is_none();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn passes_error_lines_through_without_error_sentinel() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let consumer = shared(HoardingConsumer::new("query"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer.clone(), &mut sink).await.unwrap();
        send_all(&r.err_tx, &["ERR: boom"]).await;
        send_all(&r.out_tx, &["row1", "X_MARK"]).await;
        r.filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap();

        let lines = consumer.lock().unwrap().result().lines().map(String::from).collect();
        assert_that(sorted(lines)).is_equal_to(vec!["ERR: boom".to_owned(), "row1".to_owned()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_stream_fails_the_round() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let consumer = shared(HoardingConsumer::new("crash"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer.clone(), &mut sink).await.unwrap();
        send_all(&r.out_tx, &["last words"]).await;
        drop(r.out_tx);
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_that(err.to_string().as_str())
            .contains("stdout closed while or before running \"crash\"");
        assert_that(consumer.lock().unwrap().lines()).contains_exactly(&["last words"]);
        assert_that(r.filter.is_running()).is_false();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stdout_failure_takes_precedence() {
        let r = round(
            SentinelConsumer::new("echo X_MARK", "X_MARK"),
            Some(SentinelConsumer::new("blahblah", "unknown command")),
        );
        let consumer = shared(HoardingConsumer::new("crash"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer, &mut sink).await.unwrap();
        drop(r.err_tx);
        // Give the stderr watcher a head start.
        let out_tx = r.out_tx;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(out_tx);
        });
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_that(matches!(
            err,
            RunnerError::StreamClosed {
                stream: StreamKind::StdOut,
                ..
            }
        ))
        .is_true();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn times_out_naming_the_sentinel_command() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let consumer = shared(HoardingConsumer::new("sleep 4"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer, &mut sink).await.unwrap();
        send_all(&r.out_tx, &["still busy"]).await;
        let started = jiff::Timestamp::now();
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_millis(300))
            .await
            .unwrap_err();
        let elapsed = jiff::Timestamp::now().duration_since(started);

        assert_that(err.to_string()).is_equal_to(
            "in command \"sleep 4\", time 300ms expired before detection of output from sentinel command \"echo X_MARK\""
                .to_owned(),
        );
        assert_that(elapsed >= jiff::SignedDuration::from_millis(300)).is_true();
        assert_that(elapsed < jiff::SignedDuration::from_secs(2)).is_true();
        assert_that(r.filter.is_running()).is_false();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn times_out_naming_the_prompt() {
        let r = round(SentinelConsumer::prompt("db> "), None);
        let consumer = shared(HoardingConsumer::new("sleep 4"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer, &mut sink).await.unwrap();
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_that(matches!(
            err,
            RunnerError::Timeout {
                awaited: AwaitedSentinel::Prompt,
                ..
            }
        ))
        .is_true();
        // Nothing but the command itself was written.
        assert_that(String::from_utf8(sink).unwrap()).is_equal_to("sleep 4\n".to_owned());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prompt_sentinel_is_detected() {
        let r = round(SentinelConsumer::prompt("db> "), None);
        let consumer = shared(HoardingConsumer::new("show tables"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer.clone(), &mut sink).await.unwrap();
        send_all(&r.out_tx, &["users", "orders", "db> "]).await;
        r.filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap();

        assert_that(consumer.lock().unwrap().lines()).contains_exactly(&["users", "orders"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn catastrophic_consumer_error_fails_the_round() {
        struct Fragile;
        impl OutputConsumer for Fragile {
            fn command(&self) -> &str {
                "query"
            }
            fn consume(&mut self, line: &str) -> Result<(), ConsumeError> {
                Err(format!("cannot digest {line:?}").into())
            }
            fn succeeded(&self) -> bool {
                false
            }
            fn reset(&mut self) {}
        }

        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(shared(Fragile), &mut sink).await.unwrap();
        send_all(&r.out_tx, &["garbage", "X_MARK"]).await;
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_that(err.to_string())
            .is_equal_to("consumer of stdout failed: cannot digest \"garbage\"".to_owned());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn embedded_line_feed_is_a_framing_violation() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let consumer = shared(HoardingConsumer::new("query"));
        let mut sink = Vec::<u8>::new();

        r.filter.begin_run(consumer, &mut sink).await.unwrap();
        send_all(&r.out_tx, &["two\nlines", "X_MARK"]).await;
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_that(matches!(err, RunnerError::FramingViolation { .. })).is_true();
    }

    #[tokio::test]
    async fn wait_requires_a_running_command() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let mut sink = Vec::<u8>::new();
        let err = r
            .filter
            .wait(&mut sink, &r.out, &r.err, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_that(matches!(err, RunnerError::NothingRunning)).is_true();
        assert_that(sink).is_empty();
    }

    #[tokio::test]
    #[traced_test]
    async fn echoes_commands_at_the_configured_level() {
        let r = round(SentinelConsumer::new("echo X_MARK", "X_MARK"), None);
        let mut sink = Vec::<u8>::new();
        r.filter.issue_command("select 1", &mut sink).await.unwrap();
        assert_that(logs_contain("Issuing command")).is_true();
        assert_that(logs_contain("select 1")).is_true();
    }
}
