use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Anything notified once per frame with the smoothed delta.
pub trait Tickable {
    fn tick(&mut self, dt: Duration);
}

impl<F> Tickable for F
where
    F: FnMut(Duration),
{
    fn tick(&mut self, dt: Duration) {
        self(dt)
    }
}

pub(crate) type TickableRef = Weak<RefCell<dyn Tickable>>;

#[derive(Default)]
struct Inner {
    entries: RefCell<Vec<TickableRef>>,
    passes: Cell<u64>,
}

/// Live set of tickables, driven once per frame.
///
/// The registry holds weak references only: whoever attaches a tickable keeps it
/// alive. Dropping the last strong reference silently removes it from future
/// passes.
///
/// Cloning produces another handle to the same set.
#[derive(Clone, Default)]
pub struct TickableRegistry {
    inner: Rc<Inner>,
}

impl TickableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tickable` to the live set.
    ///
    /// Returns `false` if it was already attached; attaching twice still yields
    /// one notification per pass.
    pub fn attach<T>(&self, tickable: &Rc<RefCell<T>>) -> bool
    where
        T: Tickable + 'static,
    {
        let weak = Rc::downgrade(tickable) as TickableRef;
        self.attach_weak(weak)
    }

    /// Removes `tickable` from the live set. No-op if absent.
    pub fn detach<T>(&self, tickable: &Rc<RefCell<T>>) -> bool
    where
        T: Tickable + 'static,
    {
        let weak = Rc::downgrade(tickable) as TickableRef;
        self.detach_weak(&weak)
    }

    pub fn contains<T>(&self, tickable: &Rc<RefCell<T>>) -> bool
    where
        T: Tickable + 'static,
    {
        let weak = Rc::downgrade(tickable) as TickableRef;
        self.inner
            .entries
            .borrow()
            .iter()
            .any(|e| Weak::ptr_eq(e, &weak))
    }

    pub(crate) fn attach_weak(&self, weak: TickableRef) -> bool {
        let mut entries = self.inner.entries.borrow_mut();
        if entries.iter().any(|e| Weak::ptr_eq(e, &weak)) {
            return false;
        }
        entries.push(weak);
        true
    }

    pub(crate) fn detach_weak(&self, weak: &TickableRef) -> bool {
        let mut entries = self.inner.entries.borrow_mut();
        match entries.iter().position(|e| Weak::ptr_eq(e, weak)) {
            Some(index) => {
                // `remove` keeps registration order for the remaining entries.
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of attached tickables that are still alive.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .borrow()
            .iter()
            .filter(|e| e.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed `tick_all` passes.
    pub fn passes(&self) -> u64 {
        self.inner.passes.get()
    }

    /// Notifies every attached tickable exactly once, in registration order.
    ///
    /// The set is snapshotted before the first notification: tickables attached
    /// during the pass are first ticked on the next pass, and tickables that
    /// detach themselves (or others) mid-pass do not disturb iteration.
    pub fn tick_all(&self, dt: Duration) {
        let snapshot: Vec<TickableRef> = {
            let mut entries = self.inner.entries.borrow_mut();
            entries.retain(|e| e.strong_count() > 0);
            entries.clone()
        };

        for weak in snapshot {
            let Some(tickable) = weak.upgrade() else {
                continue;
            };
            match tickable.try_borrow_mut() {
                Ok(mut t) => t.tick(dt),
                Err(_) => log::warn!("tickable is already borrowed; skipped for this pass"),
            }
        }

        self.inner.passes.set(self.inner.passes.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Duration = Duration::from_millis(16);

    #[derive(Default)]
    struct Counter {
        ticks: u32,
        last_dt: Duration,
    }

    impl Tickable for Counter {
        fn tick(&mut self, dt: Duration) {
            self.ticks += 1;
            self.last_dt = dt;
        }
    }

    fn counter() -> Rc<RefCell<Counter>> {
        Rc::new(RefCell::new(Counter::default()))
    }

    // ── attach / detach ───────────────────────────────────────────────────

    #[test]
    fn attach_twice_ticks_once() {
        let reg = TickableRegistry::new();
        let c = counter();
        assert!(reg.attach(&c));
        assert!(!reg.attach(&c));
        assert_eq!(reg.len(), 1);

        reg.tick_all(DT);
        assert_eq!(c.borrow().ticks, 1);
        assert_eq!(c.borrow().last_dt, DT);
    }

    #[test]
    fn detach_is_idempotent() {
        let reg = TickableRegistry::new();
        let c = counter();
        reg.attach(&c);
        assert!(reg.detach(&c));
        assert!(!reg.detach(&c));
        assert!(!reg.contains(&c));

        reg.tick_all(DT);
        assert_eq!(c.borrow().ticks, 0);
    }

    #[test]
    fn dropped_tickables_are_pruned() {
        let reg = TickableRegistry::new();
        let c = counter();
        reg.attach(&c);
        drop(c);
        assert!(reg.is_empty());
        reg.tick_all(DT);
        assert_eq!(reg.passes(), 1);
    }

    #[test]
    fn closures_are_tickables() {
        let reg = TickableRegistry::new();
        let seen = Rc::new(Cell::new(Duration::ZERO));
        let sink = seen.clone();
        let f = Rc::new(RefCell::new(move |dt: Duration| sink.set(sink.get() + dt)));
        reg.attach(&f);
        reg.tick_all(DT);
        reg.tick_all(DT);
        assert_eq!(seen.get(), DT * 2);
    }

    // ── snapshot semantics ────────────────────────────────────────────────

    struct Spawner {
        reg: TickableRegistry,
        child: Rc<RefCell<Counter>>,
    }

    impl Tickable for Spawner {
        fn tick(&mut self, _dt: Duration) {
            self.reg.attach(&self.child);
        }
    }

    #[test]
    fn attached_mid_pass_waits_for_next_pass() {
        let reg = TickableRegistry::new();
        let child = counter();
        let spawner = Rc::new(RefCell::new(Spawner {
            reg: reg.clone(),
            child: child.clone(),
        }));
        reg.attach(&spawner);

        reg.tick_all(DT);
        assert_eq!(child.borrow().ticks, 0);

        reg.tick_all(DT);
        assert_eq!(child.borrow().ticks, 1);
    }

    struct SelfDetach {
        reg: TickableRegistry,
        me: Weak<RefCell<SelfDetach>>,
        ticks: u32,
    }

    impl Tickable for SelfDetach {
        fn tick(&mut self, _dt: Duration) {
            self.ticks += 1;
            let me: TickableRef = self.me.clone();
            self.reg.detach_weak(&me);
        }
    }

    #[test]
    fn self_detach_mid_pass_keeps_others_ticking() {
        let reg = TickableRegistry::new();
        let first = counter();
        let leaver = Rc::new_cyclic(|me: &Weak<RefCell<SelfDetach>>| {
            RefCell::new(SelfDetach {
                reg: reg.clone(),
                me: me.clone(),
                ticks: 0,
            })
        });
        let last = counter();

        reg.attach(&first);
        reg.attach(&leaver);
        reg.attach(&last);

        reg.tick_all(DT);
        reg.tick_all(DT);

        assert_eq!(first.borrow().ticks, 2);
        assert_eq!(leaver.borrow().ticks, 1);
        assert_eq!(last.borrow().ticks, 2);
    }

    #[test]
    fn notifies_in_registration_order() {
        let reg = TickableRegistry::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut keep = Vec::new();
        for i in 0..4 {
            let log = order.clone();
            let t = Rc::new(RefCell::new(move |_dt: Duration| log.borrow_mut().push(i)));
            reg.attach(&t);
            keep.push(t);
        }
        reg.tick_all(DT);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }
}
