use crate::error::RunnerError;
use std::sync::Mutex;

/// Append-only record of infrastructure failures.
///
/// Any task working for a runner (stream adapters, the exit supervisor, rounds) may log into it.
/// A non-empty log means the runner is unusable.
#[derive(Debug, Default)]
pub struct ErrorLog {
    errors: Mutex<Vec<RunnerError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, error: RunnerError) {
        tracing::warn!(%error, "Runner entered error state");
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error),
            // A panic while pushing cannot leave the vec half-written.
            Err(poisoned) => poisoned.into_inner().push(error),
        }
    }

    /// Logs `result`'s error, if any, and hands the result back.
    pub fn log_err<T>(&self, result: Result<T, RunnerError>) -> Result<T, RunnerError> {
        if let Err(err) = &result {
            self.log(err.clone());
        }
        result
    }

    pub fn last_error(&self) -> Option<RunnerError> {
        let errors = match self.errors.lock() {
            Ok(errors) => errors,
            Err(poisoned) => poisoned.into_inner(),
        };
        errors.last().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.last_error().is_none()
    }

    /// All logged errors, oldest first.
    pub fn errors(&self) -> Vec<RunnerError> {
        match self.errors.lock() {
            Ok(errors) => errors.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
