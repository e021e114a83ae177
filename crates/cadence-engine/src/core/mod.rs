//! Engine-facing contracts.
//!
//! [`Runtime`] is the frame driver a platform loop (or a test) calls once per
//! frame. Games plug in through [`Game`] and get their dependencies from
//! [`Services`].

mod game;
mod runtime;
mod services;

pub use game::Game;
pub use runtime::{ExitRequest, Launched, RenderStep, Runtime, RuntimeConfig};
pub use services::Services;
