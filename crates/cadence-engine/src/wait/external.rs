use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Completion state of an [`ExternalOp`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExternalStatus {
    #[default]
    Pending,
    Completed,
    Failed(String),
}

impl ExternalStatus {
    #[inline]
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExternalStatus::Pending)
    }
}

#[derive(Debug, Default)]
struct Inner {
    status: Mutex<ExternalStatus>,
    /// `f32` bits.
    progress: AtomicU32,
}

/// Completion flag flipped by an actor outside the frame loop.
///
/// This is the only scheduler-facing type that may cross threads: an asset
/// loader (or any background worker) keeps a clone, does its work, then calls
/// [`complete`](Self::complete) or [`fail`](Self::fail). Tasks waiting on it
/// observe the flag on the next tick; nothing ever blocks on it.
///
/// The first terminal call wins; later ones are ignored.
#[derive(Debug, Clone, Default)]
pub struct ExternalOp {
    inner: Arc<Inner>,
}

impl ExternalOp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the operation successful. Returns `false` if it had already finished.
    pub fn complete(&self) -> bool {
        self.finish(ExternalStatus::Completed)
    }

    /// Marks the operation failed with `error`. Returns `false` if it had already finished.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.finish(ExternalStatus::Failed(error.into()))
    }

    fn finish(&self, status: ExternalStatus) -> bool {
        let mut current = self.lock();
        if current.is_finished() {
            return false;
        }
        if status == ExternalStatus::Completed {
            self.inner.progress.store(1.0f32.to_bits(), Ordering::Release);
        }
        *current = status;
        true
    }

    /// Reports progress in `[0, 1]`; values outside are clamped.
    pub fn set_progress(&self, progress: f32) {
        let p = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.inner.progress.store(p.to_bits(), Ordering::Release);
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.inner.progress.load(Ordering::Acquire))
    }

    pub fn status(&self) -> ExternalStatus {
        self.lock().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().is_finished()
    }

    /// Error message if the operation failed.
    pub fn error(&self) -> Option<String> {
        match &*self.lock() {
            ExternalStatus::Failed(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExternalStatus> {
        // A plain enum cannot be left half-written.
        self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
