use std::fmt;
use std::time::Duration;

use super::PointId;

/// Why awaiting a suspension point did not succeed.
///
/// Returned to the procedure, which may recover (for example by yielding a
/// fresh point) or propagate it with `?`. A propagated `TimedOut` is reported
/// by the scheduler as a timeout rather than a generic failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// A `PollUntil` reached its limit before the predicate held.
    TimedOut { limit: Duration },

    /// An external operation finished with an error.
    Failed(String),

    /// The task already has a pending point; a task waits on one point at a time.
    AlreadySuspended { pending: PointId },
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::TimedOut { limit } => {
                write!(f, "wait timed out after {:.3}s", limit.as_secs_f64())
            }
            WaitError::Failed(msg) => write!(f, "external operation failed: {msg}"),
            WaitError::AlreadySuspended { pending } => {
                write!(f, "task is already suspended on {pending}")
            }
        }
    }
}

impl std::error::Error for WaitError {}
