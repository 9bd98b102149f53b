//! Predefined consumers.

use crate::consumer::{ConsumeError, OutputConsumer};
use std::fmt::{Debug, Formatter};
use std::io::Write;

/// Discards all output and always succeeds.
///
/// Use this to run a command whose output is of no interest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscardingConsumer {
    pub command: String,
}

impl DiscardingConsumer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl OutputConsumer for DiscardingConsumer {
    fn command(&self) -> &str {
        &self.command
    }

    fn consume(&mut self, line: &str) -> Result<(), ConsumeError> {
        tracing::trace!(line, "Discarding line");
        Ok(())
    }

    fn succeeded(&self) -> bool {
        true
    }

    fn reset(&mut self) {}
}

/// Keeps every line it is given. Always succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoardingConsumer {
    command: String,
    data: String,
}

impl HoardingConsumer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: String::new(),
        }
    }

    /// Replaces the command, allowing reuse after [OutputConsumer::reset].
    pub fn set_command(&mut self, command: impl Into<String>) {
        self.command = command.into();
    }

    /// Everything consumed so far, each line terminated by a line-feed.
    pub fn result(&self) -> &str {
        &self.data
    }

    pub fn lines(&self) -> Vec<&str> {
        self.data.lines().collect()
    }
}

impl OutputConsumer for HoardingConsumer {
    fn command(&self) -> &str {
        &self.command
    }

    fn consume(&mut self, line: &str) -> Result<(), ConsumeError> {
        self.data.push_str(line);
        // Restore the line-feed stripped by the line source.
        self.data.push('\n');
        Ok(())
    }

    fn succeeded(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.data.clear();
    }
}

/// Writes every line, followed by a line-feed, into `W`. Always succeeds.
///
/// A failing write is reported as a catastrophe, ending the round.
pub struct PrintingConsumer<W: Write + Send> {
    command: String,
    out: W,
}

impl<W: Write + Send> PrintingConsumer<W> {
    pub fn new(command: impl Into<String>, out: W) -> Self {
        Self {
            command: command.into(),
            out,
        }
    }

    pub fn set_command(&mut self, command: impl Into<String>) {
        self.command = command.into();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Debug for PrintingConsumer<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintingConsumer")
            .field("command", &self.command)
            .field("out", &"non-debug < W >")
            .finish()
    }
}

impl<W: Write + Send> OutputConsumer for PrintingConsumer<W> {
    fn command(&self) -> &str {
        &self.command
    }

    fn consume(&mut self, line: &str) -> Result<(), ConsumeError> {
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    fn succeeded(&self) -> bool {
        true
    }

    fn reset(&mut self) {}
}

/// Succeeds once it sees `value` anywhere in a line.
///
/// The value had better be unambiguous: the first line containing it marks the end of the
/// output of whatever command preceded the sentinel command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentinelConsumer {
    /// The sentinel command, e.g. `"echo Rumpelstiltskin"`.
    /// Empty when relying on the subprocess' own prompt.
    pub command: String,

    /// The value to look for, e.g. `"Rumpelstiltskin"`.
    pub value: String,

    matched_line: Option<String>,
}

impl SentinelConsumer {
    pub fn new(command: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            value: value.into(),
            matched_line: None,
        }
    }

    /// Looks for the subprocess' prompt without issuing a sentinel command.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::new(String::new(), prompt)
    }

    /// The entire line that contained the sentinel value.
    pub fn matched_line(&self) -> Option<&str> {
        self.matched_line.as_deref()
    }
}

impl OutputConsumer for SentinelConsumer {
    fn command(&self) -> &str {
        &self.command
    }

    fn consume(&mut self, line: &str) -> Result<(), ConsumeError> {
        if line.contains(self.value.as_str()) {
            self.matched_line = Some(line.to_owned());
        }
        Ok(())
    }

    fn succeeded(&self) -> bool {
        self.matched_line.is_some()
    }

    fn reset(&mut self) {
        self.matched_line = None;
    }
}
