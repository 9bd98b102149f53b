use std::error::Error;
use std::sync::{Arc, Mutex};

/// Error a consumer returns from [OutputConsumer::consume] when the whole round must be aborted.
pub type ConsumeError = Box<dyn Error + Send + Sync>;

/// A consumer shared between the caller and the two stream watchers of a round.
///
/// The mutex is the only lock taken around a [OutputConsumer::consume] call.
pub type SharedConsumer = Arc<Mutex<dyn OutputConsumer>>;

/// Knows one command of the wrapped subprocess and how to digest that command's output.
///
/// The runner knows nothing about the vocabulary of the subprocess it drives. Each command is
/// described by an implementation of this trait, which receives every line the command produced,
/// from stdout and stderr alike, in unspecified cross-stream order.
pub trait OutputConsumer: Send {
    /// The command text to send, e.g. `"echo hello"`.
    ///
    /// An empty command means that issuing it is a no-op.
    fn command(&self) -> &str;

    /// Accepts one line of output, without its line terminator.
    ///
    /// Only return an error on a catastrophe after which the subprocess should not be used
    /// anymore. Ordinary trouble parsing the output must be recorded internally instead, as any
    /// error returned here ends the round and renders the runner unusable.
    fn consume(&mut self, line: &str) -> Result<(), ConsumeError>;

    /// Whether this consumer decided that it succeeded in parsing the output.
    ///
    /// Sentinel consumers report `true` once they saw their sentinel value.
    fn succeeded(&self) -> bool;

    /// Clears accumulated state so that the consumer can be used in another round.
    ///
    /// Sentinel consumers must report `false` from [OutputConsumer::succeeded] afterward.
    fn reset(&mut self);
}

/// Wraps a consumer for use with [crate::ProcessRunner::run_round].
///
/// Keep a clone of the returned `Arc` to inspect the consumer after the round.
pub fn shared<C: OutputConsumer + 'static>(consumer: C) -> Arc<Mutex<C>> {
    Arc::new(Mutex::new(consumer))
}
