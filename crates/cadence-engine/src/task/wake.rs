use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use crate::wait::PointId;

use super::TaskId;

/// Tasks whose suspension point resolved, waiting for the resume pass.
///
/// A `BTreeSet` keeps them in id (registration) order and collapses duplicate
/// wakeups into one resume.
#[derive(Debug, Default)]
pub(crate) struct WakeQueue {
    ready: RefCell<BTreeSet<TaskId>>,
    next_point: Cell<u64>,
}

impl WakeQueue {
    pub(crate) fn notify(&self, task: TaskId) {
        self.ready.borrow_mut().insert(task);
    }

    pub(crate) fn forget(&self, task: TaskId) {
        self.ready.borrow_mut().remove(&task);
    }

    pub(crate) fn contains(&self, task: TaskId) -> bool {
        self.ready.borrow().contains(&task)
    }

    /// Takes the current ready set; wakeups raised while it is processed land
    /// in a fresh set for the next pass.
    pub(crate) fn drain(&self) -> BTreeSet<TaskId> {
        std::mem::take(&mut *self.ready.borrow_mut())
    }

    pub(crate) fn next_point_id(&self) -> PointId {
        let id = self.next_point.get();
        self.next_point.set(id + 1);
        PointId(id)
    }
}
