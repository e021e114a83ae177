use std::cell::Cell;
use std::future::{Future, IntoFuture};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;

use crate::tick::TickableRegistry;
use crate::wait::{ExternalOp, PointId, PollUntil, Suspend, SuspensionPoint, WaitError};

use super::scheduler::{Scheduler, WeakScheduler};
use super::{ContextId, TaskHandle, TaskId, WakeQueue};

/// Per-task state shared between the task table and the task's own context.
pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) context: ContextId,
    pub(crate) label: String,
    pub(crate) cancelled: Cell<bool>,
    /// At most one pending point per task.
    pub(crate) pending: Cell<Option<PointId>>,
}

impl TaskShared {
    pub(crate) fn new(id: TaskId, context: ContextId, label: String) -> Self {
        Self {
            id,
            context,
            label,
            cancelled: Cell::new(false),
            pending: Cell::new(None),
        }
    }

    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            context: self.context,
        }
    }
}

/// Handle a procedure uses to suspend itself and talk to the scheduler.
///
/// Every procedure receives its own `TaskCtx`. It is cheap to clone and holds
/// only a weak reference to the scheduler.
///
/// ```rust,ignore
/// scheduler.start(ContextId::ROOT, "intro", |ctx| async move {
///     ctx.delay(Duration::from_secs(1)).await?;
///     ctx.poll_until(move || door.is_open())
///         .every(Duration::from_millis(250))
///         .timeout(Duration::from_secs(5))
///         .await?;
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct TaskCtx {
    task: Rc<TaskShared>,
    registry: TickableRegistry,
    wake: Rc<WakeQueue>,
    scheduler: WeakScheduler,
}

impl TaskCtx {
    pub(crate) fn new(
        task: Rc<TaskShared>,
        registry: TickableRegistry,
        wake: Rc<WakeQueue>,
        scheduler: WeakScheduler,
    ) -> Self {
        Self {
            task,
            registry,
            wake,
            scheduler,
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    #[inline]
    pub fn handle(&self) -> TaskHandle {
        self.task.handle()
    }

    /// `"<context name>::<task name>"`, as used in logs and errors.
    #[inline]
    pub fn label(&self) -> &str {
        &self.task.label
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.task.cancelled.get()
    }

    /// Point the task is currently waiting on, if any.
    pub fn pending_point(&self) -> Option<PointId> {
        self.task.pending.get()
    }

    // ── suspension ────────────────────────────────────────────────────────

    /// Suspends on an arbitrary point.
    pub fn suspend(&self, point: SuspensionPoint) -> Suspend {
        Suspend::new(point, self.task.clone(), self.registry.clone(), self.wake.clone())
    }

    pub fn delay(&self, duration: Duration) -> Suspend {
        self.suspend(SuspensionPoint::delay(duration))
    }

    /// Delay given in seconds. Negative or NaN values mean "next frame".
    pub fn delay_secs(&self, secs: f64) -> Suspend {
        let duration = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
        self.delay(duration)
    }

    pub fn next_frame(&self) -> Suspend {
        self.suspend(SuspensionPoint::next_frame())
    }

    /// Waits until `predicate` holds. Chain `every` / `timeout`, then await.
    pub fn poll_until<F>(&self, predicate: F) -> PollUntilWait
    where
        F: FnMut() -> bool + 'static,
    {
        PollUntilWait {
            ctx: self.clone(),
            poll: PollUntil::new(predicate),
        }
    }

    pub fn external(&self, op: &ExternalOp) -> Suspend {
        self.suspend(SuspensionPoint::external(op))
    }

    // ── scheduling ────────────────────────────────────────────────────────

    /// Scheduler this task runs on, if it is still alive.
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.scheduler.upgrade()
    }

    /// Starts a sibling task in this task's context.
    ///
    /// The new task runs up to its first suspension before this call returns.
    pub fn start<F, Fut>(&self, name: &str, procedure: F) -> anyhow::Result<TaskHandle>
    where
        F: FnOnce(TaskCtx) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let scheduler = self
            .scheduler
            .upgrade()
            .with_context(|| format!("{}: scheduler is gone, cannot start `{name}`", self.task.label))?;
        Ok(scheduler.start(self.task.context, name, procedure))
    }

    /// Cancels `handle`. Cancelling the calling task takes effect when it next
    /// suspends.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.cancel(handle))
    }

    /// Scope guard bound to the procedure; see [`defer`].
    pub fn defer<F: FnOnce()>(&self, f: F) -> Deferred<F> {
        defer(f)
    }
}

/// `PollUntil` under construction; await it to suspend.
#[must_use = "suspension points do nothing unless awaited"]
pub struct PollUntilWait {
    ctx: TaskCtx,
    poll: PollUntil,
}

impl PollUntilWait {
    pub fn every(mut self, interval: Duration) -> Self {
        self.poll = self.poll.every(interval);
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.poll = self.poll.timeout(limit);
        self
    }
}

impl IntoFuture for PollUntilWait {
    type Output = Result<(), WaitError>;
    type IntoFuture = Suspend;

    fn into_future(self) -> Suspend {
        self.ctx.suspend(self.poll.into())
    }
}

/// Runs a closure when dropped: on completion, on failure, and when the task
/// is cancelled while suspended.
#[must_use = "the closure runs when the guard is dropped"]
pub struct Deferred<F: FnOnce()> {
    f: Option<F>,
}

impl<F: FnOnce()> Deferred<F> {
    /// Drops the guard without running the closure.
    pub fn dismiss(mut self) {
        self.f = None;
    }
}

impl<F: FnOnce()> Drop for Deferred<F> {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

pub fn defer<F: FnOnce()>(f: F) -> Deferred<F> {
    Deferred { f: Some(f) }
}
