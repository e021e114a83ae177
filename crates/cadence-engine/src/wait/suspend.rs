use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use crate::task::{TaskId, TaskShared, WakeQueue};
use crate::tick::{Tickable, TickableRef, TickableRegistry};

use super::error::WaitError;
use super::point::{PointId, Resolution, SuspensionPoint};

/// A suspension point attached to the registry on behalf of a task.
pub(crate) struct ArmedPoint {
    id: PointId,
    task: TaskId,
    point: SuspensionPoint,
    outcome: Option<Resolution>,
    resolved: bool,
    me: TickableRef,
    registry: TickableRegistry,
    wake: Rc<WakeQueue>,
}

impl ArmedPoint {
    fn arm(
        id: PointId,
        task: TaskId,
        point: SuspensionPoint,
        registry: TickableRegistry,
        wake: Rc<WakeQueue>,
    ) -> Rc<RefCell<ArmedPoint>> {
        let armed = Rc::new_cyclic(|me: &Weak<RefCell<ArmedPoint>>| {
            RefCell::new(ArmedPoint {
                id,
                task,
                point,
                outcome: None,
                resolved: false,
                me: me.clone(),
                registry: registry.clone(),
                wake,
            })
        });
        registry.attach(&armed);
        armed
    }
}

impl Tickable for ArmedPoint {
    fn tick(&mut self, dt: Duration) {
        if self.resolved {
            return;
        }
        let Some(resolution) = self.point.advance(dt) else {
            return;
        };

        log::trace!("{} ({}) of {} resolved: {:?}", self.id, self.point.kind(), self.task, resolution);

        self.resolved = true;
        self.outcome = Some(resolution);
        self.registry.detach_weak(&self.me);
        self.wake.notify(self.task);
    }
}

enum State {
    Unarmed(SuspensionPoint),
    Armed {
        id: PointId,
        point: Rc<RefCell<ArmedPoint>>,
    },
    Done,
}

/// Future returned when a task awaits a [`SuspensionPoint`].
///
/// The first poll arms the point: it joins the tick registry (first ticked on
/// the next pass) and is recorded as the task's pending point. The future
/// completes on the poll that follows resolution.
///
/// Dropping it while armed (cancellation) detaches the point without
/// evaluating it again.
#[must_use = "suspension points do nothing unless awaited"]
pub struct Suspend {
    state: State,
    task: Rc<TaskShared>,
    registry: TickableRegistry,
    wake: Rc<WakeQueue>,
}

impl Suspend {
    pub(crate) fn new(
        point: SuspensionPoint,
        task: Rc<TaskShared>,
        registry: TickableRegistry,
        wake: Rc<WakeQueue>,
    ) -> Self {
        Self {
            state: State::Unarmed(point),
            task,
            registry,
            wake,
        }
    }

    fn release(&self, id: PointId) {
        if self.task.pending.get() == Some(id) {
            self.task.pending.set(None);
        }
    }
}

impl Future for Suspend {
    type Output = Result<(), WaitError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match std::mem::replace(&mut this.state, State::Done) {
            State::Unarmed(point) => {
                // A cancelled task is about to be dropped; never arm on its behalf.
                if this.task.cancelled.get() {
                    this.state = State::Unarmed(point);
                    return Poll::Pending;
                }

                if let Some(pending) = this.task.pending.get() {
                    log::warn!("{} tried to suspend while already waiting on {pending}", this.task.label);
                    return Poll::Ready(Err(WaitError::AlreadySuspended { pending }));
                }

                let id = this.wake.next_point_id();
                log::trace!("{} suspends on {id} ({})", this.task.label, point.kind());

                let armed = ArmedPoint::arm(
                    id,
                    this.task.id,
                    point,
                    this.registry.clone(),
                    this.wake.clone(),
                );
                this.task.pending.set(Some(id));
                this.state = State::Armed { id, point: armed };
                Poll::Pending
            }

            State::Armed { id, point } => {
                let outcome = point.borrow_mut().outcome.take();
                match outcome {
                    Some(resolution) => {
                        this.release(id);
                        Poll::Ready(match resolution {
                            Resolution::Ready => Ok(()),
                            Resolution::TimedOut(limit) => Err(WaitError::TimedOut { limit }),
                            Resolution::Failed(msg) => Err(WaitError::Failed(msg)),
                        })
                    }
                    None => {
                        this.state = State::Armed { id, point };
                        Poll::Pending
                    }
                }
            }

            State::Done => panic!("`Suspend` polled after completion"),
        }
    }
}

impl Drop for Suspend {
    fn drop(&mut self) {
        if let State::Armed { id, point } = &self.state {
            let weak = Rc::downgrade(point) as TickableRef;
            self.registry.detach_weak(&weak);
            self.release(*id);
        }
    }
}
