//! Time subsystem.
//!
//! `FrameClock` turns raw frame deltas into a clamped, jitter-filtered delta.
//! Intended usage:
//! - one `FrameClock` per frame loop
//! - call `tick(raw_ms)` (or `tick_now()`) once per frame and hand the smoothed
//!   delta to the tick pass and the render step

mod frame_clock;
mod smoothing;

pub use frame_clock::{ClockConfig, FrameClock, FrameSample};
pub use smoothing::DemaFilter;
