use std::cell::Cell;
use std::future::Future;

use super::scheduler::{Scheduler, WeakScheduler};
use super::{ContextId, TaskCtx, TaskError, TaskHandle, TaskState};

/// Owner of a group of tasks, for example one game object.
///
/// Each behavior gets its own scheduler context: its tasks can be stopped in
/// bulk and its errors routed to its own handler. After [`dispose`](Self::dispose)
/// it refuses to start anything new.
pub struct Behavior {
    context: ContextId,
    name: String,
    scheduler: WeakScheduler,
    disposed: Cell<bool>,
}

impl Behavior {
    pub fn new(scheduler: &Scheduler, name: impl Into<String>) -> Self {
        let name = name.into();
        let context = scheduler.create_context(name.clone());
        Self {
            context,
            name,
            scheduler: scheduler.downgrade(),
            disposed: Cell::new(false),
        }
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.context
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Starts a task owned by this behavior.
    ///
    /// Returns `None` once disposed or when the scheduler is gone.
    pub fn start<F, Fut>(&self, name: &str, procedure: F) -> Option<TaskHandle>
    where
        F: FnOnce(TaskCtx) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        if self.is_disposed() {
            log::warn!("{}: start of `{name}` refused, behavior is disposed", self.name);
            return None;
        }
        let scheduler = self.scheduler.upgrade()?;
        Some(scheduler.start(self.context, name, procedure))
    }

    /// Cancels every live task of this behavior.
    pub fn stop_all(&self) -> usize {
        self.scheduler
            .upgrade()
            .map_or(0, |scheduler| scheduler.cancel_all(self.context))
    }

    /// Stops everything and refuses further starts. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            let stopped = scheduler.remove_context(self.context);
            log::debug!("{} disposed ({stopped} task(s) stopped)", self.name);
        }
    }

    /// Routes failures of this behavior's tasks to `handler`.
    pub fn on_error<F>(&self, handler: F) -> bool
    where
        F: FnMut(&TaskError) + 'static,
    {
        self.scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.set_error_handler(self.context, handler))
    }

    /// Observes every terminal transition of this behavior's tasks.
    pub fn on_exit<F>(&self, handler: F) -> bool
    where
        F: FnMut(TaskHandle, TaskState) + 'static,
    {
        self.scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.set_exit_handler(self.context, handler))
    }
}

impl Drop for Behavior {
    fn drop(&mut self) {
        self.dispose();
    }
}
