//! Per-frame notification.
//!
//! A `Tickable` receives the smoothed delta once per frame. The
//! `TickableRegistry` is the live set driven by the frame loop; suspension
//! points attach themselves to it while they wait.

mod registry;

pub use registry::{Tickable, TickableRegistry};

pub(crate) use registry::TickableRef;
