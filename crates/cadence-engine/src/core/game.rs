use std::future::Future;
use std::rc::Rc;

use anyhow::Result;

use crate::task::TaskCtx;

use super::services::Services;

/// Game contract driven by [`Runtime::launch`](super::Runtime::launch).
///
/// Construction resolves every dependency from [`Services`]; afterwards the
/// game runs as one task: `load` to completion, then `activate`. Both phases
/// are ordinary task procedures and may suspend on any point.
pub trait Game: Sized + 'static {
    /// Display name; also the name of the scheduler context the game runs in.
    const NAME: &'static str;

    fn create(services: &Services) -> Result<Self>;

    /// Loading phase. Defaults to nothing.
    fn load(self: Rc<Self>, ctx: TaskCtx) -> impl Future<Output = Result<()>> + 'static {
        let _ = (self, ctx);
        async { Ok(()) }
    }

    /// Main phase; the game task completes when this returns.
    fn activate(self: Rc<Self>, ctx: TaskCtx) -> impl Future<Output = Result<()>> + 'static;
}
