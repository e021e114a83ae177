use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use cadence_engine::wait::ExternalOp;

/// Simulated asset database.
///
/// Each stage loads on a worker thread that reports through an `ExternalOp`;
/// the frame loop never blocks on it.
pub struct AssetDatabase {
    root: String,
    /// Time the worker spends per image.
    per_asset: Duration,
    loaded: Arc<Mutex<BTreeSet<String>>>,
}

impl AssetDatabase {
    pub fn new(root: impl Into<String>, per_asset: Duration) -> Self {
        Self {
            root: root.into(),
            per_asset,
            loaded: Arc::default(),
        }
    }

    /// Starts loading `images` in the background.
    pub fn load_stage(&self, images: &[&str]) -> ExternalOp {
        let op = ExternalOp::new();
        let worker = op.clone();
        let loaded = self.loaded.clone();
        let per_asset = self.per_asset;
        let paths: Vec<String> = images.iter().map(|name| format!("{}/{name}", self.root)).collect();

        let spawned = thread::Builder::new()
            .name("asset-loader".into())
            .spawn(move || {
                let total = paths.len().max(1) as f32;
                for (i, path) in paths.iter().enumerate() {
                    thread::sleep(per_asset);
                    if path.ends_with(".missing") {
                        worker.fail(format!("asset \"{path}\" failed to load"));
                        return;
                    }
                    loaded
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(path.clone());
                    worker.set_progress((i + 1) as f32 / total);
                }
                worker.complete();
            });

        if let Err(e) = spawned {
            op.fail(format!("failed to spawn loader thread: {e}"));
        }

        op
    }

    pub fn is_loaded(&self, image: &str) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&format!("{}/{image}", self.root))
    }
}
