mod consumer;
mod consumers;
mod error;
mod error_log;
mod line_source;
mod parameters;
mod runner;
mod sentinel_filter;
mod signal;

pub use consumer::{ConsumeError, OutputConsumer, SharedConsumer, shared};
pub use consumers::{DiscardingConsumer, HoardingConsumer, PrintingConsumer, SentinelConsumer};
pub use error::{
    AwaitedSentinel, CloseError, ParameterError, RoundError, RunnerError, TerminationError,
};
pub use error_log::ErrorLog;
pub use line_source::{
    DEFAULT_STDERR_CHANNEL_CAPACITY, DEFAULT_STDOUT_CHANNEL_CAPACITY, LineSourceOptions,
    StreamKind,
};
pub use parameters::{RunParameters, RunParametersBuilder};
pub use runner::{ProcessRunner, RunnerState};
pub use sentinel_filter::DEFAULT_ROUND_TIMEOUT;
