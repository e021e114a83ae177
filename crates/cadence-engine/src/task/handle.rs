use std::fmt;

/// Process-lifetime task identity.
///
/// Ids grow monotonically, so ordering by id is ordering by registration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Owning context of a group of tasks (bulk cancellation, error handlers).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub(crate) u64);

impl ContextId {
    /// Context every scheduler creates up front, named "root".
    pub const ROOT: ContextId = ContextId(0);
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Handle returned by `start`. Cheap to copy; holds no reference to the task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) context: ContextId,
}

impl TaskHandle {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.context
    }
}

/// Task lifecycle.
///
/// `Created → Running → Suspended ⇄ (Resuming → Running) → {Completed | Failed | Cancelled}`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    /// Waiting on a suspension point that has not resolved.
    Suspended,
    /// Its point resolved; it runs on the next resume pass.
    Resuming,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}
