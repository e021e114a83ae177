//! Cadence engine crate.
//!
//! A frame-driven runtime for game logic written as cooperative tasks:
//!
//! - [`time`]: frame clock with jitter-filtered deltas
//! - [`tick`]: per-frame notification registry
//! - [`wait`]: suspension points (delay, predicate poll, external completion)
//! - [`task`]: scheduler, task contexts, behaviors
//! - [`core`]: runtime, game contract, services
//! - [`window`]: `winit` platform loop

pub mod time;
pub mod tick;
pub mod wait;
pub mod task;
pub mod core;

pub mod logging;
pub mod window;
