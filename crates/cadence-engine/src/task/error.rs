use std::fmt;
use std::time::Duration;

/// Ways a task ends other than completing.
///
/// `context` is the task label, `"<context name>::<task name>"`.
#[derive(Debug)]
pub enum TaskError {
    /// The procedure returned an error or panicked.
    Failure { context: String, cause: anyhow::Error },

    /// The procedure propagated a `PollUntil` timeout.
    TimedOut { context: String, limit: Duration },

    /// Deliberate termination. Never passed to error handlers.
    Cancelled { context: String },
}

impl TaskError {
    pub fn context(&self) -> &str {
        match self {
            TaskError::Failure { context, .. }
            | TaskError::TimedOut { context, .. }
            | TaskError::Cancelled { context } => context,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failure { context, cause } => write!(f, "{context} failed: {cause:#}"),
            TaskError::TimedOut { context, limit } => {
                write!(f, "{context} timed out after {:.3}s", limit.as_secs_f64())
            }
            TaskError::Cancelled { context } => write!(f, "{context} was cancelled"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Failure { cause, .. } => Some(&**cause),
            _ => None,
        }
    }
}
