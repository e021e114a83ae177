//! Cooperative tasks.
//!
//! A task wraps an `async` procedure. The [`Scheduler`] polls it until it
//! awaits a suspension point, keeps it parked while the point is ticked by the
//! registry, and resumes it on the frame the point resolves. Everything here is
//! single-threaded; only [`ExternalOp`](crate::wait::ExternalOp) crosses threads.

mod behavior;
mod ctx;
mod error;
mod handle;
mod scheduler;
mod wake;

pub use behavior::Behavior;
pub use ctx::{defer, Deferred, PollUntilWait, TaskCtx};
pub use error::TaskError;
pub use handle::{ContextId, TaskHandle, TaskId, TaskState};
pub use scheduler::{ErrorHandler, ExitHandler, Scheduler, SchedulerConfig, WeakScheduler};

pub(crate) use ctx::TaskShared;
pub(crate) use wake::WakeQueue;
