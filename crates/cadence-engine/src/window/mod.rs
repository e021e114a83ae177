//! Window + platform loop.
//!
//! Owns the `winit` event loop and window and calls the runtime once per redraw.

mod host;

pub use host::{WindowConfig, WindowHost};
