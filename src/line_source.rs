use crate::error::RunnerError;
use crate::error_log::ErrorLog;
use bytes::{Bytes, BytesMut};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;

/// Default capacity of the stdout line channel, in lines.
pub const DEFAULT_STDOUT_CHANNEL_CAPACITY: usize = 10_000;

/// Default capacity of the stderr line channel, in lines.
pub const DEFAULT_STDERR_CHANNEL_CAPACITY: usize = 1_000;

/// Identifies one of the two output streams of a subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    StdOut,
    StdErr,
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::StdOut => write!(f, "stdout"),
            StreamKind::StdErr => write!(f, "stderr"),
        }
    }
}

/// NOTE: Lines are buffered in the channel until a round consumes them. The channel never drops
/// lines, so a full channel stops reading and, eventually, blocks the subprocess on a full pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSourceOptions {
    /// The size of the buffer used when reading from the stream in bytes.
    ///
    /// default: 16 * 1024 // 16 kb
    pub read_buffer_size: usize,

    /// The number of lines held by the underlying channel.
    ///
    /// default: 10_000 for stdout, 1_000 for stderr
    pub channel_capacity: usize,

    /// Maximum length of a single line in bytes. Exceeding it is a read failure.
    /// A value of 0 means no limit.
    ///
    /// default: 64 * 1024 // 64 kb
    pub max_line_length: usize,
}

impl Default for LineSourceOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: 16 * 1024,
            channel_capacity: DEFAULT_STDOUT_CHANNEL_CAPACITY,
            max_line_length: 64 * 1024,
        }
    }
}

impl LineSourceOptions {
    pub(crate) fn stderr_default() -> Self {
        Self {
            channel_capacity: DEFAULT_STDERR_CHANNEL_CAPACITY,
            ..Self::default()
        }
    }
}

/// The receiving end of one stream's line channel.
///
/// Outlives individual rounds. Each round's watcher locks it for as long as it reads.
#[derive(Clone)]
pub(crate) struct LineSource {
    kind: StreamKind,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl Debug for LineSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("kind", &self.kind)
            .field(
                "receiver",
                &"non-debug < tokio::sync::mpsc::Receiver<String> >",
            )
            .finish()
    }
}

impl LineSource {
    pub(crate) fn new(kind: StreamKind, receiver: mpsc::Receiver<String>) -> Self {
        Self {
            kind,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Creates a connected sender/source pair.
    pub(crate) fn channel(kind: StreamKind, capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self::new(kind, receiver))
    }

    pub(crate) fn kind(&self) -> StreamKind {
        self.kind
    }

    pub(crate) async fn lock(&self) -> OwnedMutexGuard<mpsc::Receiver<String>> {
        self.receiver.clone().lock_owned().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineTooLong;

/// Conceptually, this iterator appends the given byte slice to the current line buffer, which may
/// already hold some previously read data.
/// The resulting view of data is split by line-feeds (`\n`). Every completed line is yielded,
/// without its terminator and without a trailing carriage return.
/// The remainder of the chunk, not completed with a line-feed, stays in `line_buffer`.
///
/// Yields a single `Err(LineTooLong)` once the line being assembled outgrows `max_line_length`.
pub(crate) struct LineReader<'c, 'b> {
    chunk: &'c [u8],
    line_buffer: &'b mut BytesMut,
    max_line_length: usize,
}

impl<'c, 'b> LineReader<'c, 'b> {
    pub(crate) fn new(
        chunk: &'c [u8],
        line_buffer: &'b mut BytesMut,
        max_line_length: usize,
    ) -> Self {
        Self {
            chunk,
            line_buffer,
            max_line_length,
        }
    }

    fn exceeds_limit(&self) -> bool {
        self.max_line_length > 0 && self.line_buffer.len() > self.max_line_length
    }
}

impl Iterator for LineReader<'_, '_> {
    type Item = Result<Bytes, LineTooLong>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk.is_empty() {
            return None;
        }

        match self.chunk.iter().position(|b| *b == b'\n') {
            None => {
                // No more line breaks - consume the remaining chunk.
                self.line_buffer.extend_from_slice(self.chunk);
                self.chunk = &[];
                if self.exceeds_limit() {
                    return Some(Err(LineTooLong));
                }
                None
            }
            Some(pos) => {
                let (until_line_break, rest) = self.chunk.split_at(pos);
                self.line_buffer.extend_from_slice(until_line_break);
                // `rest` starts with the line-feed.
                self.chunk = &rest[1..];
                if self.exceeds_limit() {
                    self.chunk = &[];
                    return Some(Err(LineTooLong));
                }
                Some(Ok(take_line(self.line_buffer)))
            }
        }
    }
}

/// Splits the buffered line off `line_buffer`, leaving it empty.
fn take_line(line_buffer: &mut BytesMut) -> Bytes {
    let mut line = line_buffer.split();
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    line.freeze()
}

/// Copies `line` into a fresh string, prepending `prefix`.
fn to_owned_line(prefix: Option<&str>, line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    match prefix {
        None => text.into_owned(),
        Some(prefix) => {
            let mut owned = String::with_capacity(prefix.len() + text.len());
            owned.push_str(prefix);
            owned.push_str(&text);
            owned
        }
    }
}

/// Continuously reads `read`, forwarding each line into `sender`.
///
/// Read failures are recorded in `errors`. The task ends at end-of-stream, on the first failure,
/// or when the receiving side of the channel is gone.
pub(crate) fn spawn_line_source<R: AsyncRead + Unpin + Send + 'static>(
    read: R,
    kind: StreamKind,
    prefix: Option<String>,
    options: LineSourceOptions,
    sender: mpsc::Sender<String>,
    errors: Arc<ErrorLog>,
) -> JoinHandle<()> {
    tokio::spawn(read_lines(read, kind, prefix, options, sender, errors))
}

async fn read_lines<R: AsyncRead + Unpin + Send>(
    mut read: R,
    kind: StreamKind,
    prefix: Option<String>,
    options: LineSourceOptions,
    sender: mpsc::Sender<String>,
    errors: Arc<ErrorLog>,
) {
    let mut buf = BytesMut::with_capacity(options.read_buffer_size);
    let mut line_buffer = BytesMut::new();
    loop {
        buf.clear();
        match read.read_buf(&mut buf).await {
            Ok(0) => {
                if !line_buffer.is_empty() {
                    let line = take_line(&mut line_buffer);
                    forward(&sender, kind, prefix.as_deref(), &line).await;
                }
                tracing::debug!(stream = %kind, "Reached end of stream");
                break;
            }
            Ok(_bytes_read) => {
                for line in LineReader::new(&buf, &mut line_buffer, options.max_line_length) {
                    match line {
                        Ok(line) => {
                            if !forward(&sender, kind, prefix.as_deref(), &line).await {
                                return;
                            }
                        }
                        Err(LineTooLong) => {
                            errors.log(RunnerError::LineTooLong {
                                stream: kind,
                                max_line_length: options.max_line_length,
                            });
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                errors.log(RunnerError::StreamReadFailed {
                    stream: kind,
                    source: Arc::new(err),
                });
                break;
            }
        }
    }
}

async fn forward(
    sender: &mpsc::Sender<String>,
    kind: StreamKind,
    prefix: Option<&str>,
    line: &[u8],
) -> bool {
    match sender.send(to_owned_line(prefix, line)).await {
        Ok(()) => true,
        Err(_err) => {
            // The runner is gone. Nobody will ever look at this output.
            tracing::debug!(stream = %kind, "No receiver for output lines, stopping");
            false
        }
    }
}
