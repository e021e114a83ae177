use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::tick::TickableRegistry;
use crate::wait::{panic_message, PointId, WaitError};

use super::ctx::{TaskCtx, TaskShared};
use super::{ContextId, TaskError, TaskHandle, TaskId, TaskState, WakeQueue};

/// Receives `Failure` and `TimedOut` reports.
pub type ErrorHandler = Box<dyn FnMut(&TaskError)>;

/// Receives every terminal transition, including cancellation.
pub type ExitHandler = Box<dyn FnMut(TaskHandle, TaskState)>;

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Level used to log failures no handler claimed.
    pub unhandled_error_level: log::Level,

    /// Convert panics inside a task into `Failure` instead of unwinding into
    /// the frame loop.
    pub catch_panics: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            unhandled_error_level: log::Level::Error,
            catch_panics: true,
        }
    }
}

struct TaskRecord {
    shared: Rc<TaskShared>,
    state: TaskState,
    /// `None` while the task is being polled, and once it is terminal.
    future: Option<TaskFuture>,
    error: Option<TaskError>,
    resumes: u64,
}

struct ContextEntry {
    name: String,
    on_error: Option<ErrorHandler>,
    on_exit: Option<ExitHandler>,
}

enum Exit {
    Completed,
    Cancelled,
    Failed(anyhow::Error),
}

struct Inner {
    config: SchedulerConfig,
    registry: TickableRegistry,
    wake: Rc<WakeQueue>,
    tasks: RefCell<BTreeMap<TaskId, TaskRecord>>,
    contexts: RefCell<HashMap<ContextId, ContextEntry>>,
    default_handler: RefCell<Option<ErrorHandler>>,
    next_task: Cell<u64>,
    next_context: Cell<u64>,
}

/// Cooperative, single-threaded task scheduler.
///
/// Tasks are `async` procedures that suspend on suspension points
/// ([`TaskCtx::delay`], [`TaskCtx::poll_until`], [`TaskCtx::external`]). One
/// frame is:
///
/// 1. [`reap`](Self::reap) terminal tasks from the previous frame
/// 2. tick every armed point through the registry
/// 3. [`resume_ready`](Self::resume_ready): resume tasks whose point resolved,
///    in start order
///
/// [`step`](Self::step) performs all three. Points armed during step 3 are
/// first ticked next frame.
///
/// No scheduler borrow is held while task code, drops, handlers or predicates
/// run, so every method may be called from inside a task.
///
/// Cloning produces another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

/// Non-owning scheduler handle.
#[derive(Clone, Default)]
pub struct WeakScheduler {
    inner: Weak<Inner>,
}

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.inner.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Scheduler {
    pub fn new(registry: TickableRegistry, config: SchedulerConfig) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(
            ContextId::ROOT,
            ContextEntry {
                name: "root".to_string(),
                on_error: None,
                on_exit: None,
            },
        );

        Self {
            inner: Rc::new(Inner {
                config,
                registry,
                wake: Rc::new(WakeQueue::default()),
                tasks: RefCell::new(BTreeMap::new()),
                contexts: RefCell::new(contexts),
                default_handler: RefCell::new(None),
                next_task: Cell::new(0),
                next_context: Cell::new(1),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Registry that armed points join.
    pub fn registry(&self) -> &TickableRegistry {
        &self.inner.registry
    }

    // ── contexts ──────────────────────────────────────────────────────────

    pub fn create_context(&self, name: impl Into<String>) -> ContextId {
        let id = ContextId(self.inner.next_context.get());
        self.inner.next_context.set(id.0 + 1);
        self.inner.contexts.borrow_mut().insert(
            id,
            ContextEntry {
                name: name.into(),
                on_error: None,
                on_exit: None,
            },
        );
        id
    }

    pub fn context_name(&self, context: ContextId) -> Option<String> {
        self.inner
            .contexts
            .borrow()
            .get(&context)
            .map(|entry| entry.name.clone())
    }

    /// Cancels the context's live tasks and forgets its handlers.
    pub fn remove_context(&self, context: ContextId) -> usize {
        let cancelled = self.cancel_all(context);
        if context != ContextId::ROOT {
            let removed = self.inner.contexts.borrow_mut().remove(&context);
            drop(removed);
        }
        cancelled
    }

    /// Routes `Failure` / `TimedOut` reports of `context` to `handler`.
    ///
    /// Returns `false` for an unknown context.
    pub fn set_error_handler<F>(&self, context: ContextId, handler: F) -> bool
    where
        F: FnMut(&TaskError) + 'static,
    {
        let mut contexts = self.inner.contexts.borrow_mut();
        match contexts.get_mut(&context) {
            Some(entry) => {
                entry.on_error = Some(Box::new(handler));
                true
            }
            None => false,
        }
    }

    /// Notifies `handler` of every task of `context` reaching a terminal state.
    pub fn set_exit_handler<F>(&self, context: ContextId, handler: F) -> bool
    where
        F: FnMut(TaskHandle, TaskState) + 'static,
    {
        let mut contexts = self.inner.contexts.borrow_mut();
        match contexts.get_mut(&context) {
            Some(entry) => {
                entry.on_exit = Some(Box::new(handler));
                true
            }
            None => false,
        }
    }

    /// Fallback for contexts without their own error handler. Without one,
    /// errors are logged at `SchedulerConfig::unhandled_error_level`.
    pub fn set_default_error_handler<F>(&self, handler: F)
    where
        F: FnMut(&TaskError) + 'static,
    {
        *self.inner.default_handler.borrow_mut() = Some(Box::new(handler));
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Starts `procedure` as a new task and runs it up to its first
    /// suspension (or to completion).
    pub fn start<F, Fut>(&self, context: ContextId, name: &str, procedure: F) -> TaskHandle
    where
        F: FnOnce(TaskCtx) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let id = TaskId(self.inner.next_task.get());
        self.inner.next_task.set(id.0 + 1);

        let context_name = self
            .context_name(context)
            .unwrap_or_else(|| context.to_string());
        let shared = Rc::new(TaskShared::new(id, context, format!("{context_name}::{name}")));
        let handle = shared.handle();

        let ctx = TaskCtx::new(
            shared.clone(),
            self.inner.registry.clone(),
            self.inner.wake.clone(),
            self.downgrade(),
        );
        let future: TaskFuture = Box::pin(procedure(ctx));

        log::debug!("{} started as {id}", shared.label);
        self.inner.tasks.borrow_mut().insert(
            id,
            TaskRecord {
                shared,
                state: TaskState::Created,
                future: Some(future),
                error: None,
                resumes: 0,
            },
        );

        self.drive(id);
        handle
    }

    /// Cancels a live task.
    ///
    /// A suspended task is dropped right away: destructors in its current
    /// scope run, its pending point is detached without being evaluated, and
    /// only then is it marked `Cancelled`. A task cancelled while it is
    /// running finishes as soon as its current step returns.
    ///
    /// Returns `false` if the task is unknown, terminal, or already cancelled.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let (future, shared) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(record) = tasks.get_mut(&handle.id) else {
                return false;
            };
            if record.state.is_terminal() || record.shared.cancelled.get() {
                return false;
            }
            record.shared.cancelled.set(true);
            (record.future.take(), record.shared.clone())
        };

        self.inner.wake.forget(handle.id);

        match future {
            Some(future) => {
                let exit = match self.release(future) {
                    Some(cause) => Exit::Failed(cause),
                    None => Exit::Cancelled,
                };
                self.finish(&shared, exit);
            }
            None => log::debug!("{} cancelled mid-step", shared.label),
        }
        true
    }

    /// Cancels every live task of `context`, oldest first.
    pub fn cancel_all(&self, context: ContextId) -> usize {
        let targets: Vec<TaskHandle> = self
            .inner
            .tasks
            .borrow()
            .values()
            .filter(|r| r.shared.context == context && !r.state.is_terminal())
            .map(|r| r.shared.handle())
            .collect();

        targets
            .into_iter()
            .filter(|handle| self.cancel(*handle))
            .count()
    }

    // ── frame passes ──────────────────────────────────────────────────────

    /// One full scheduler frame: reap, tick pass, resume pass.
    ///
    /// Returns the number of tasks resumed.
    pub fn step(&self, dt: Duration) -> usize {
        self.reap();
        self.inner.registry.tick_all(dt);
        self.resume_ready()
    }

    /// Resumes every task whose point resolved since the last resume pass,
    /// in start order.
    pub fn resume_ready(&self) -> usize {
        let ready = self.inner.wake.drain();
        let mut resumed = 0;

        for id in ready {
            {
                let mut tasks = self.inner.tasks.borrow_mut();
                let Some(record) = tasks.get_mut(&id) else {
                    continue;
                };
                if record.state != TaskState::Suspended || record.future.is_none() {
                    continue;
                }
                record.resumes += 1;
            }

            log::trace!("resuming {id}");
            self.drive(id);
            resumed += 1;
        }

        resumed
    }

    /// Drops terminal tasks from the table. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let removed: Vec<TaskRecord> = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let dead: Vec<TaskId> = tasks
                .iter()
                .filter(|(_, r)| r.state.is_terminal())
                .map(|(id, _)| *id)
                .collect();
            dead.iter().filter_map(|id| tasks.remove(id)).collect()
        };
        removed.len()
    }

    // ── queries ───────────────────────────────────────────────────────────

    /// Current state, or `None` once the task has been reaped.
    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        let tasks = self.inner.tasks.borrow();
        let record = tasks.get(&handle.id)?;
        Some(match record.state {
            TaskState::Suspended if self.inner.wake.contains(handle.id) => TaskState::Resuming,
            state => state,
        })
    }

    pub fn is_live(&self, handle: TaskHandle) -> bool {
        self.state(handle).is_some_and(|s| !s.is_terminal())
    }

    /// Tasks that have not reached a terminal state.
    pub fn live_count(&self) -> usize {
        self.inner
            .tasks
            .borrow()
            .values()
            .filter(|r| !r.state.is_terminal())
            .count()
    }

    /// All tasks in the table, including terminal ones not yet reaped.
    pub fn len(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the task was resumed after a suspension.
    pub fn resumes(&self, handle: TaskHandle) -> Option<u64> {
        self.inner.tasks.borrow().get(&handle.id).map(|r| r.resumes)
    }

    pub fn pending_point(&self, handle: TaskHandle) -> Option<PointId> {
        self.inner
            .tasks
            .borrow()
            .get(&handle.id)
            .and_then(|r| r.shared.pending.get())
    }

    /// Takes the error a failed task carries (until it is reaped).
    pub fn take_error(&self, handle: TaskHandle) -> Option<TaskError> {
        self.inner
            .tasks
            .borrow_mut()
            .get_mut(&handle.id)
            .and_then(|r| r.error.take())
    }

    // ── driving ───────────────────────────────────────────────────────────

    fn drive(&self, id: TaskId) {
        let (mut future, shared) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(record) = tasks.get_mut(&id) else {
                return;
            };
            if record.state.is_terminal() {
                return;
            }
            // Already on the stack (a task cannot poll itself).
            let Some(future) = record.future.take() else {
                return;
            };
            record.state = TaskState::Running;
            (future, record.shared.clone())
        };

        let mut cx = Context::from_waker(Waker::noop());
        let polled = if self.inner.config.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        } else {
            Ok(future.as_mut().poll(&mut cx))
        };

        let exit = if shared.cancelled.get() {
            Exit::Cancelled
        } else {
            match polled {
                Ok(Poll::Pending) => {
                    if shared.pending.get().is_none() {
                        // Waiting on something that is not a suspension point.
                        log::trace!("{} yielded without a point; retrying next pass", shared.label);
                        self.inner.wake.notify(id);
                    }
                    let mut tasks = self.inner.tasks.borrow_mut();
                    if let Some(record) = tasks.get_mut(&id) {
                        record.state = TaskState::Suspended;
                        record.future = Some(future);
                    }
                    return;
                }
                Ok(Poll::Ready(Ok(()))) => Exit::Completed,
                Ok(Poll::Ready(Err(cause))) => Exit::Failed(cause),
                Err(payload) => Exit::Failed(anyhow::anyhow!(
                    "panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        };

        // Scoped cleanup runs before the terminal state becomes visible.
        let exit = match (self.release(future), exit) {
            (Some(cause), Exit::Completed | Exit::Cancelled) => Exit::Failed(cause),
            (Some(cause), failed) => {
                log::warn!("{}: {cause:#}", shared.label);
                failed
            }
            (None, exit) => exit,
        };
        self.finish(&shared, exit);
    }

    /// Drops a task's future. A panic in its destructors is returned as the
    /// failure cause when panics are caught.
    fn release(&self, future: TaskFuture) -> Option<anyhow::Error> {
        if !self.inner.config.catch_panics {
            drop(future);
            return None;
        }
        panic::catch_unwind(AssertUnwindSafe(move || drop(future)))
            .err()
            .map(|payload| anyhow::anyhow!("panicked during cleanup: {}", panic_message(payload.as_ref())))
    }

    fn finish(&self, shared: &TaskShared, exit: Exit) {
        self.inner.wake.forget(shared.id);

        let (state, error) = match exit {
            Exit::Completed => (TaskState::Completed, None),
            Exit::Cancelled => (TaskState::Cancelled, None),
            Exit::Failed(cause) => (TaskState::Failed, Some(classify(&shared.label, cause))),
        };

        if let Some(record) = self.inner.tasks.borrow_mut().get_mut(&shared.id) {
            record.state = state;
            record.future = None;
        }

        match state {
            TaskState::Completed => log::debug!("{} completed", shared.label),
            TaskState::Cancelled => log::debug!("{} cancelled", shared.label),
            _ => {}
        }

        if let Some(error) = error {
            self.report(shared.context, &error);
            if let Some(record) = self.inner.tasks.borrow_mut().get_mut(&shared.id) {
                record.error = Some(error);
            }
        }

        self.notify_exit(shared.handle(), state);
    }

    fn report(&self, context: ContextId, error: &TaskError) {
        let handler = self
            .inner
            .contexts
            .borrow_mut()
            .get_mut(&context)
            .and_then(|entry| entry.on_error.take());

        if let Some(mut handler) = handler {
            handler(error);
            if let Some(entry) = self.inner.contexts.borrow_mut().get_mut(&context) {
                entry.on_error.get_or_insert(handler);
            }
            return;
        }

        let fallback = self.inner.default_handler.borrow_mut().take();
        if let Some(mut handler) = fallback {
            handler(error);
            self.inner.default_handler.borrow_mut().get_or_insert(handler);
            return;
        }

        log::log!(self.inner.config.unhandled_error_level, "unhandled task error: {error}");
    }

    fn notify_exit(&self, handle: TaskHandle, state: TaskState) {
        let handler = self
            .inner
            .contexts
            .borrow_mut()
            .get_mut(&handle.context)
            .and_then(|entry| entry.on_exit.take());

        if let Some(mut handler) = handler {
            handler(handle, state);
            if let Some(entry) = self.inner.contexts.borrow_mut().get_mut(&handle.context) {
                entry.on_exit.get_or_insert(handler);
            }
        }
    }
}

fn classify(label: &str, cause: anyhow::Error) -> TaskError {
    let timed_out = match cause.downcast_ref::<WaitError>() {
        Some(WaitError::TimedOut { limit }) => Some(*limit),
        _ => None,
    };

    match timed_out {
        Some(limit) => TaskError::TimedOut {
            context: label.to_string(),
            limit,
        },
        None => TaskError::Failure {
            context: label.to_string(),
            cause,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::defer;
    use crate::tick::Tickable;
    use crate::wait::ExternalOp;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(TickableRegistry::new(), SchedulerConfig::default())
    }

    /// Collects error reports for the root context.
    fn capture_errors(s: &Scheduler) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        s.set_error_handler(ContextId::ROOT, move |e| {
            let kind = match e {
                TaskError::Failure { cause, .. } => format!("failure: {cause}"),
                TaskError::TimedOut { limit, .. } => format!("timeout: {}ms", limit.as_millis()),
                TaskError::Cancelled { .. } => "cancelled".to_string(),
            };
            sink.borrow_mut().push(kind);
        });
        seen
    }

    #[derive(Default)]
    struct Counter(u32);

    impl Tickable for Counter {
        fn tick(&mut self, _dt: Duration) {
            self.0 += 1;
        }
    }

    // ── start ─────────────────────────────────────────────────────────────

    #[test]
    fn start_runs_until_first_suspension() {
        let s = scheduler();
        let reached = Rc::new(Cell::new(0));
        let r = reached.clone();
        let h = s.start(ContextId::ROOT, "intro", move |ctx| async move {
            r.set(1);
            ctx.delay(ms(100)).await?;
            r.set(2);
            Ok(())
        });

        assert_eq!(reached.get(), 1);
        assert_eq!(s.state(h), Some(TaskState::Suspended));
        assert!(s.pending_point(h).is_some());
        assert_eq!(s.registry().len(), 1);
    }

    #[test]
    fn start_completes_immediately_without_suspension() {
        let s = scheduler();
        let h = s.start(ContextId::ROOT, "instant", |_ctx| async { Ok(()) });
        assert_eq!(s.state(h), Some(TaskState::Completed));
        assert_eq!(s.live_count(), 0);
        assert_eq!(s.reap(), 1);
        assert_eq!(s.state(h), None);
    }

    #[test]
    fn labels_carry_context_and_task_name() {
        let s = scheduler();
        let ctx_id = s.create_context("Player");
        let label = Rc::new(RefCell::new(String::new()));
        let l = label.clone();
        s.start(ctx_id, "jump", move |ctx| async move {
            *l.borrow_mut() = ctx.label().to_string();
            Ok(())
        });
        assert_eq!(*label.borrow(), "Player::jump");
    }

    // ── scenario A: consecutive delays ────────────────────────────────────

    #[test]
    fn consecutive_delays_complete_at_cumulative_time() {
        let s = scheduler();
        let observer = Rc::new(RefCell::new(Counter::default()));
        s.registry().attach(&observer);

        let h = s.start(ContextId::ROOT, "delays", |ctx| async move {
            ctx.delay(Duration::from_secs(1)).await?;
            ctx.delay(ms(500)).await?;
            Ok(())
        });

        for frame in 1..=15 {
            s.step(ms(100));
            if frame < 15 {
                assert!(s.is_live(h), "finished early at frame {frame}");
            }
            if frame == 10 {
                assert_eq!(s.resumes(h), Some(1));
            }
        }

        assert_eq!(observer.borrow().0, 15);
        assert_eq!(s.registry().passes(), 15);
        assert_eq!(s.resumes(h), Some(2));
        assert_eq!(s.state(h), Some(TaskState::Completed));
    }

    // ── scenario B: failure on second resume ──────────────────────────────

    #[test]
    fn failure_is_reported_and_task_is_reaped() {
        let s = scheduler();
        let errors = capture_errors(&s);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();

        let h = s.start(ContextId::ROOT, "fragile", move |ctx| async move {
            ctx.delay(ms(100)).await?;
            r.set(r.get() + 1);
            ctx.delay(ms(100)).await?;
            r.set(r.get() + 1);
            anyhow::bail!("sprite sheet corrupt");
        });

        s.step(ms(100));
        assert_eq!(s.state(h), Some(TaskState::Suspended));
        s.step(ms(100));
        assert_eq!(s.state(h), Some(TaskState::Failed));
        assert_eq!(*errors.borrow(), vec!["failure: sprite sheet corrupt".to_string()]);
        assert_eq!(s.live_count(), 0);

        s.step(ms(100));
        assert_eq!(s.state(h), None);
        assert_eq!(runs.get(), 2);
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn failed_task_carries_its_error_until_reaped() {
        let s = scheduler();
        capture_errors(&s);
        let h = s.start(ContextId::ROOT, "bad", |_ctx| async { anyhow::bail!("nope") });
        let err = s.take_error(h).unwrap();
        assert_eq!(err.context(), "root::bad");
        assert!(err.to_string().contains("nope"));
    }

    // ── scenario C: poll boundary before timeout ──────────────────────────

    #[test]
    fn poll_until_resolves_at_first_poll_boundary_after_condition() {
        let s = scheduler();
        let errors = capture_errors(&s);

        let world = Rc::new(Cell::new(Duration::ZERO));
        let w = world.clone();
        let clock = Rc::new(RefCell::new(move |dt: Duration| w.set(w.get() + dt)));
        s.registry().attach(&clock);

        let resolved_at = Rc::new(Cell::new(None));
        let at = resolved_at.clone();
        let now = world.clone();
        let h = s.start(ContextId::ROOT, "poll", move |ctx| async move {
            let probe = now.clone();
            ctx.poll_until(move || probe.get() > ms(600))
                .every(ms(250))
                .timeout(Duration::from_secs(1))
                .await?;
            at.set(Some(now.get()));
            Ok(())
        });

        for _ in 0..4 {
            s.step(ms(200));
        }

        assert_eq!(s.state(h), Some(TaskState::Completed));
        let at = resolved_at.get().unwrap();
        assert!(at >= ms(750) && at < Duration::from_secs(1), "resolved at {at:?}");
        assert!(errors.borrow().is_empty());
    }

    // ── poll-until timeout exactness ──────────────────────────────────────

    #[test]
    fn poll_until_times_out_on_first_tick_at_limit() {
        let s = scheduler();
        let errors = capture_errors(&s);
        let h = s.start(ContextId::ROOT, "never", |ctx| async move {
            ctx.poll_until(|| false).timeout(Duration::from_secs(1)).await?;
            Ok(())
        });

        for _ in 0..3 {
            s.step(ms(250));
            assert!(s.is_live(h));
        }
        s.step(ms(250));
        assert_eq!(s.state(h), Some(TaskState::Failed));
        assert_eq!(*errors.borrow(), vec!["timeout: 1000ms".to_string()]);
        assert!(matches!(s.take_error(h), Some(TaskError::TimedOut { .. })));
    }

    #[test]
    fn timeout_can_be_recovered_inside_the_procedure() {
        let s = scheduler();
        let errors = capture_errors(&s);
        let retries = Rc::new(Cell::new(0));
        let r = retries.clone();
        let h = s.start(ContextId::ROOT, "retry", move |ctx| async move {
            loop {
                match ctx.poll_until(|| false).timeout(ms(200)).await {
                    Err(WaitError::TimedOut { .. }) if r.get() < 2 => r.set(r.get() + 1),
                    _ => break,
                }
            }
            Ok(())
        });

        for _ in 0..10 {
            s.step(ms(100));
        }
        assert_eq!(retries.get(), 2);
        assert_eq!(s.state(h), None);
        assert!(errors.borrow().is_empty());
    }

    // ── cancellation ──────────────────────────────────────────────────────

    #[test]
    fn cancelled_task_runs_no_further_code_at_any_point() {
        for cancel_after in 0..6 {
            let s = scheduler();
            let progress = Rc::new(Cell::new(0));
            let cleaned = Rc::new(Cell::new(false));
            let (p, c) = (progress.clone(), cleaned.clone());

            let h = s.start(ContextId::ROOT, "walker", move |ctx| async move {
                let _cleanup = defer(move || c.set(true));
                for _ in 0..4 {
                    ctx.delay(ms(100)).await?;
                    p.set(p.get() + 1);
                }
                Ok(())
            });

            for _ in 0..cancel_after {
                s.step(ms(50));
            }
            let before = progress.get();
            let was_live = s.is_live(h);
            assert_eq!(s.cancel(h), was_live);

            for _ in 0..10 {
                s.step(ms(100));
            }

            assert_eq!(progress.get(), before, "cancel after {cancel_after} frames");
            assert!(cleaned.get());
            assert!(s.registry().is_empty());
        }
    }

    #[test]
    fn panicking_cleanup_fails_the_task_without_escaping_cancel_all() {
        let s = scheduler();
        let group = s.create_context("group");
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        s.set_error_handler(group, move |e| sink.borrow_mut().push(e.to_string()));

        let first = s.start(group, "brittle", |ctx| async move {
            let _guard = ctx.defer(|| panic!("cleanup exploded"));
            ctx.delay(Duration::from_secs(10)).await?;
            Ok(())
        });
        let second = s.start(group, "idle", |ctx| async move {
            ctx.delay(Duration::from_secs(10)).await?;
            Ok(())
        });

        let cancelled = panic::catch_unwind(AssertUnwindSafe(|| s.cancel_all(group)));
        assert_eq!(cancelled.ok(), Some(2));
        assert_eq!(s.state(first), Some(TaskState::Failed));
        assert_eq!(s.state(second), Some(TaskState::Cancelled));
        assert_eq!(s.live_count(), 0);
        assert!(s.registry().is_empty());
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].contains("cleanup exploded"), "{:?}", errors.borrow());

        s.step(ms(16));
        assert!(s.is_empty());
    }

    #[test]
    fn panicking_cleanup_after_self_cancel_is_contained() {
        let s = scheduler();
        let errors = capture_errors(&s);
        let h = s.start(ContextId::ROOT, "quitter", |ctx| async move {
            let _guard = ctx.defer(|| panic!("guard exploded"));
            ctx.cancel(ctx.handle());
            ctx.delay(ms(100)).await?;
            Ok(())
        });

        assert_eq!(s.state(h), Some(TaskState::Failed));
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].contains("guard exploded"));
        assert!(s.registry().is_empty());
    }

    #[test]
    fn cancel_detaches_pending_point_and_marks_cancelled() {
        let s = scheduler();
        let exits = Rc::new(RefCell::new(Vec::new()));
        let e = exits.clone();
        s.set_exit_handler(ContextId::ROOT, move |_h, state| e.borrow_mut().push(state));
        let errors = capture_errors(&s);

        let h = s.start(ContextId::ROOT, "idle", |ctx| async move {
            ctx.delay(Duration::from_secs(10)).await?;
            Ok(())
        });
        assert_eq!(s.registry().len(), 1);

        assert!(s.cancel(h));
        assert!(!s.cancel(h));
        assert_eq!(s.state(h), Some(TaskState::Cancelled));
        assert!(s.registry().is_empty());
        assert!(s.pending_point(h).is_none());
        assert_eq!(*exits.borrow(), vec![TaskState::Cancelled]);
        assert!(errors.borrow().is_empty());
    }

    #[test]
    fn cancel_between_resolution_and_resume_prevents_the_resume() {
        let s = scheduler();
        let resumed = Rc::new(Cell::new(false));
        let r = resumed.clone();
        let h = s.start(ContextId::ROOT, "late", move |ctx| async move {
            ctx.delay(ms(100)).await?;
            r.set(true);
            Ok(())
        });

        s.registry().tick_all(ms(100));
        assert_eq!(s.state(h), Some(TaskState::Resuming));
        s.cancel(h);
        assert_eq!(s.resume_ready(), 0);
        assert!(!resumed.get());
    }

    #[test]
    fn self_cancel_takes_effect_at_next_suspension() {
        let s = scheduler();
        let after = Rc::new(Cell::new(false));
        let a = after.clone();
        let h = s.start(ContextId::ROOT, "quitter", move |ctx| async move {
            ctx.cancel(ctx.handle());
            ctx.delay(ms(100)).await?;
            a.set(true);
            Ok(())
        });

        assert_eq!(s.state(h), Some(TaskState::Cancelled));
        assert!(s.registry().is_empty());
        s.step(ms(100));
        assert!(!after.get());
    }

    #[test]
    fn deferred_guard_runs_on_failure_unless_dismissed() {
        let s = scheduler();
        capture_errors(&s);
        let rolled_back = Rc::new(Cell::new(0));

        let r = rolled_back.clone();
        s.start(ContextId::ROOT, "commit", move |ctx| async move {
            let guard = ctx.defer(move || r.set(r.get() + 1));
            ctx.next_frame().await?;
            guard.dismiss();
            Ok(())
        });
        let r = rolled_back.clone();
        s.start(ContextId::ROOT, "abort", move |ctx| async move {
            let _guard = ctx.defer(move || r.set(r.get() + 1));
            ctx.next_frame().await?;
            anyhow::bail!("rollback")
        });

        s.step(ms(16));
        assert_eq!(rolled_back.get(), 1);
    }

    #[test]
    fn cancel_all_only_touches_one_context() {
        let s = scheduler();
        let enemies = s.create_context("enemies");
        let ui = s.create_context("ui");

        let spawn = |ctx_id| {
            s.start(ctx_id, "loop", |ctx| async move {
                loop {
                    ctx.next_frame().await?;
                }
            })
        };
        let e1 = spawn(enemies);
        let e2 = spawn(enemies);
        let u1 = spawn(ui);

        assert_eq!(s.cancel_all(enemies), 2);
        assert_eq!(s.state(e1), Some(TaskState::Cancelled));
        assert_eq!(s.state(e2), Some(TaskState::Cancelled));
        assert!(s.is_live(u1));

        s.step(ms(16));
        assert_eq!(s.live_count(), 1);
    }

    // ── ordering ──────────────────────────────────────────────────────────

    #[test]
    fn simultaneous_resolutions_resume_in_start_order() {
        let s = scheduler();
        let order = Rc::new(RefCell::new(Vec::new()));

        // Started in reverse delay order; all resolve on the same frame.
        for (i, delay) in [(0, 300), (1, 200), (2, 100)] {
            let o = order.clone();
            s.start(ContextId::ROOT, "racer", move |ctx| async move {
                ctx.delay(ms(delay)).await?;
                o.borrow_mut().push(i);
                Ok(())
            });
        }

        s.step(ms(300));
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn point_yielded_during_resume_waits_for_next_frame() {
        let s = scheduler();
        let frames = Rc::new(Cell::new(0));
        let f = frames.clone();
        let h = s.start(ContextId::ROOT, "chain", move |ctx| async move {
            ctx.next_frame().await?;
            f.set(1);
            ctx.next_frame().await?;
            f.set(2);
            Ok(())
        });

        s.step(ms(16));
        assert_eq!(frames.get(), 1);
        assert_eq!(s.state(h), Some(TaskState::Suspended));
        s.step(ms(16));
        assert_eq!(frames.get(), 2);
    }

    // ── external ──────────────────────────────────────────────────────────

    #[test]
    fn external_completion_is_observed_on_next_tick() {
        let s = scheduler();
        let op = ExternalOp::new();
        let wait_on = op.clone();
        let h = s.start(ContextId::ROOT, "load", move |ctx| async move {
            ctx.external(&wait_on).await?;
            Ok(())
        });

        s.step(ms(16));
        assert!(s.is_live(h));

        let remote = op.clone();
        std::thread::spawn(move || remote.complete()).join().unwrap();
        assert!(s.is_live(h));

        s.step(ms(16));
        assert_eq!(s.state(h), Some(TaskState::Completed));
    }

    #[test]
    fn external_error_reaches_the_procedure() {
        let s = scheduler();
        let op = ExternalOp::new();
        let wait_on = op.clone();
        let got = Rc::new(RefCell::new(None));
        let g = got.clone();
        s.start(ContextId::ROOT, "load", move |ctx| async move {
            *g.borrow_mut() = ctx.external(&wait_on).await.err();
            Ok(())
        });

        op.fail("404 atlas.png");
        s.step(ms(16));
        assert_eq!(*got.borrow(), Some(WaitError::Failed("404 atlas.png".into())));
    }

    // ── isolation ─────────────────────────────────────────────────────────

    #[test]
    fn failures_and_panics_do_not_affect_other_tasks() {
        let s = scheduler();
        let errors = capture_errors(&s);
        let survivor_done = Rc::new(Cell::new(false));
        let d = survivor_done.clone();

        s.start(ContextId::ROOT, "panics", |ctx| async move {
            ctx.next_frame().await?;
            panic!("index out of range");
        });
        s.start(ContextId::ROOT, "errors", |ctx| async move {
            ctx.next_frame().await?;
            anyhow::bail!("bad state")
        });
        let survivor = s.start(ContextId::ROOT, "survivor", move |ctx| async move {
            ctx.delay(ms(32)).await?;
            d.set(true);
            Ok(())
        });

        s.step(ms(16));
        s.step(ms(16));

        assert!(survivor_done.get());
        assert_eq!(s.state(survivor), Some(TaskState::Completed));
        let errors = errors.borrow();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("index out of range"));
        assert_eq!(errors[1], "failure: bad state");
    }

    #[test]
    fn default_handler_catches_contexts_without_their_own() {
        let s = scheduler();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        s.set_default_error_handler(move |_e| h.set(h.get() + 1));
        let ctx_id = s.create_context("anon");
        s.start(ctx_id, "bad", |_ctx| async { anyhow::bail!("x") });
        assert_eq!(hits.get(), 1);
    }

    // ── invariants ────────────────────────────────────────────────────────

    #[test]
    fn second_concurrent_suspension_is_rejected() {
        let s = scheduler();
        let second = Rc::new(RefCell::new(None));
        let out = second.clone();
        s.start(ContextId::ROOT, "greedy", move |ctx| async move {
            let mut first = std::pin::pin!(ctx.delay(ms(100)));
            let mut cx = Context::from_waker(Waker::noop());
            assert!(first.as_mut().poll(&mut cx).is_pending());
            *out.borrow_mut() = Some(ctx.delay(ms(100)).await);
            first.await?;
            Ok(())
        });

        assert!(matches!(
            *second.borrow(),
            Some(Err(WaitError::AlreadySuspended { .. }))
        ));
    }

    #[test]
    fn child_tasks_start_from_inside_a_task() {
        let s = scheduler();
        let child_done = Rc::new(Cell::new(false));
        let c = child_done.clone();
        let parent = s.start(ContextId::ROOT, "parent", move |ctx| async move {
            let child = ctx.start("child", move |child_ctx| async move {
                child_ctx.delay(ms(50)).await?;
                c.set(true);
                Ok(())
            })?;
            let sched = ctx.scheduler().unwrap();
            ctx.poll_until(move || !sched.is_live(child)).await?;
            Ok(())
        });

        s.step(ms(50));
        assert!(child_done.get());
        assert!(s.is_live(parent));
        s.step(ms(16));
        assert_eq!(s.state(parent), Some(TaskState::Completed));
    }
}
