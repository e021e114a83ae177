use std::any::type_name;
use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Context, Result};

/// Typed service registry handed to [`Game::create`](super::Game::create).
///
/// Each type is registered at most once and shared as `Rc<T>`. Lookups are
/// explicit and fallible; a game resolves what it needs up front so a missing
/// service fails construction instead of surfacing mid-frame.
pub struct Services {
    map: state::TypeMap![],
    names: RefCell<Vec<&'static str>>,
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

impl Services {
    pub fn new() -> Self {
        Self {
            map: <state::TypeMap![]>::new(),
            names: RefCell::new(Vec::new()),
        }
    }

    /// Registers `value` as the `T` service.
    pub fn provide<T: 'static>(&self, value: T) -> Result<Rc<T>> {
        let shared = Rc::new(value);
        self.provide_rc(shared.clone())?;
        Ok(shared)
    }

    /// Registers an already shared service.
    pub fn provide_rc<T: 'static>(&self, value: Rc<T>) -> Result<()> {
        if !self.map.set::<Rc<T>>(value) {
            bail!("service `{}` is already registered", type_name::<T>());
        }
        self.names.borrow_mut().push(type_name::<T>());
        log::debug!("service registered: {}", type_name::<T>());
        Ok(())
    }

    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        self.map.try_get::<Rc<T>>().cloned()
    }

    /// Like [`get`](Self::get), but a missing service is an error.
    pub fn require<T: 'static>(&self) -> Result<Rc<T>> {
        self.get::<T>()
            .with_context(|| format!("service `{}` is not registered", type_name::<T>()))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.map.try_get::<Rc<T>>().is_some()
    }

    /// Type names of the registered services, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.names.borrow().clone()
    }
}
