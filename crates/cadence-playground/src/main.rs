mod assets;
mod game;
mod stage;

use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use winit::dpi::LogicalSize;

use cadence_engine::core::{Game, Runtime, RuntimeConfig};
use cadence_engine::logging::{init_logging, LoggingConfig};
use cadence_engine::task::ContextId;
use cadence_engine::window::{WindowConfig, WindowHost};

use crate::assets::AssetDatabase;
use crate::game::Playground;
use crate::stage::Stage;

/// Headless runs stop after this many frames even if the game never finishes.
const HEADLESS_FRAME_LIMIT: u64 = 60 * 30;
const HEADLESS_FRAME_MS: f64 = 1000.0 / 60.0;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let headless = std::env::args().skip(1).any(|arg| arg == "--headless");

    let mut runtime = Runtime::new(RuntimeConfig::default())?;

    let stage = runtime.services().provide(Stage::default())?;
    runtime
        .services()
        .provide(AssetDatabase::new("assets/images", Duration::from_millis(120)))?;

    // Text "renderer": dumps the stage twice a second.
    let shown = stage.clone();
    let mut since_dump = 0.0;
    runtime.set_renderer(move |dt_sec: f64| {
        since_dump += dt_sec;
        if since_dump >= 0.5 {
            since_dump = 0.0;
            for line in shown.describe() {
                log::info!("  {line}");
            }
        }
    });

    runtime
        .scheduler()
        .set_default_error_handler(|e| log::error!("task failed: {e}"));

    let launched = runtime.launch::<Playground>().context("failed to start the playground")?;
    log::info!("{} running (context {})", Playground::NAME, launched.context);

    if headless {
        run_headless(&mut runtime, &stage, launched.context)
    } else {
        let config = WindowConfig {
            title: Playground::NAME.to_string(),
            initial_size: LogicalSize::new(820.0, 560.0),
            run_in_background: true,
            ..WindowConfig::default()
        };
        WindowHost::run(config, runtime)
    }
}

/// Fixed-step loop without a window; paced in real time so the loader thread
/// overlaps with frames the way it would on screen.
fn run_headless(runtime: &mut Runtime, stage: &Rc<Stage>, game: ContextId) -> Result<()> {
    let frame = Duration::from_secs_f64(HEADLESS_FRAME_MS / 1000.0);

    while !runtime.should_exit() {
        if runtime.clock().frames() >= HEADLESS_FRAME_LIMIT {
            log::warn!("frame limit reached, stopping");
            runtime.scheduler().cancel_all(game);
            break;
        }
        runtime.frame(HEADLESS_FRAME_MS);
        std::thread::sleep(frame);
    }

    log::info!(
        "stopped after {} frames ({:.2}s clock time), {} sprite(s) on stage",
        runtime.clock().frames(),
        runtime.clock().now_sec(),
        stage.len()
    );
    Ok(())
}
