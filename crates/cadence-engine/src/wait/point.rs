use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use super::external::{ExternalOp, ExternalStatus};

/// Identity of one armed suspension point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointId(pub(crate) u64);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "point#{}", self.0)
    }
}

/// "Pause until C", as yielded by a task.
///
/// A point is single-use: it is armed when first awaited, ticked once per frame
/// while pending, and dropped after it resolves.
pub enum SuspensionPoint {
    /// Resolves once the accumulated tick time reaches the requested duration.
    Delay { remaining: Duration },

    /// Polls a predicate at a fixed cadence, with an optional timeout.
    PollUntil(PollUntil),

    /// Resolves when an outside actor finishes the operation.
    External(ExternalOp),
}

impl SuspensionPoint {
    pub fn delay(duration: Duration) -> Self {
        SuspensionPoint::Delay { remaining: duration }
    }

    /// Zero-length delay: resolves on the first tick after it is armed.
    pub fn next_frame() -> Self {
        Self::delay(Duration::ZERO)
    }

    /// Starts a `PollUntil` builder; by default the predicate is polled every
    /// tick and never times out.
    pub fn until<F>(predicate: F) -> PollUntil
    where
        F: FnMut() -> bool + 'static,
    {
        PollUntil::new(predicate)
    }

    pub fn external(op: &ExternalOp) -> Self {
        SuspensionPoint::External(op.clone())
    }

    /// Advances the state machine by one tick.
    ///
    /// Returns `Some` exactly once, on the tick that resolves the point.
    pub(crate) fn advance(&mut self, dt: Duration) -> Option<Resolution> {
        match self {
            SuspensionPoint::Delay { remaining } => {
                *remaining = remaining.saturating_sub(dt);
                remaining.is_zero().then_some(Resolution::Ready)
            }
            SuspensionPoint::PollUntil(poll) => poll.advance(dt),
            SuspensionPoint::External(op) => match op.status() {
                ExternalStatus::Pending => None,
                ExternalStatus::Completed => Some(Resolution::Ready),
                ExternalStatus::Failed(msg) => Some(Resolution::Failed(msg)),
            },
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            SuspensionPoint::Delay { .. } => "delay",
            SuspensionPoint::PollUntil(_) => "poll-until",
            SuspensionPoint::External(_) => "external",
        }
    }
}

impl fmt::Debug for SuspensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspensionPoint::Delay { remaining } => {
                f.debug_struct("Delay").field("remaining", remaining).finish()
            }
            SuspensionPoint::PollUntil(poll) => poll.fmt(f),
            SuspensionPoint::External(op) => f.debug_tuple("External").field(&op.status()).finish(),
        }
    }
}

impl From<PollUntil> for SuspensionPoint {
    fn from(poll: PollUntil) -> Self {
        SuspensionPoint::PollUntil(poll)
    }
}

/// Predicate-poll state.
pub struct PollUntil {
    predicate: Box<dyn FnMut() -> bool>,
    poll_interval: Duration,
    timeout: Option<Duration>,
    since_poll: Duration,
    elapsed: Duration,
}

impl PollUntil {
    pub fn new<F>(predicate: F) -> Self
    where
        F: FnMut() -> bool + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            poll_interval: Duration::ZERO,
            timeout: None,
            since_poll: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    /// Evaluates the predicate only once at least `interval` of tick time has
    /// accumulated since the previous evaluation.
    pub fn every(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Resolves as timed out once `limit` of tick time has accumulated.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    fn advance(&mut self, dt: Duration) -> Option<Resolution> {
        self.elapsed += dt;
        self.since_poll += dt;

        // Checked every tick, regardless of poll cadence, and ahead of the poll.
        if let Some(limit) = self.timeout {
            if self.elapsed >= limit {
                return Some(Resolution::TimedOut(limit));
            }
        }

        if self.since_poll < self.poll_interval {
            return None;
        }
        self.since_poll = Duration::ZERO;

        match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)())) {
            Ok(true) => Some(Resolution::Ready),
            Ok(false) => None,
            Err(payload) => Some(Resolution::Failed(format!(
                "poll predicate panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl fmt::Debug for PollUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollUntil")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .field("since_poll", &self.since_poll)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

/// Terminal outcome of a point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Ready,
    TimedOut(Duration),
    Failed(String),
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
