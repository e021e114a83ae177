//! Suspension points.
//!
//! A task pauses by awaiting a [`SuspensionPoint`]: a delay, a polled
//! predicate with an optional timeout, or an [`ExternalOp`] flipped by an
//! outside actor. Armed points are ticked by the registry once per frame and
//! wake their task when they resolve.

mod error;
mod external;
mod point;
mod suspend;

pub use error::WaitError;
pub use external::{ExternalOp, ExternalStatus};
pub use point::{PointId, PollUntil, SuspensionPoint};
pub use suspend::Suspend;

pub(crate) use point::panic_message;
