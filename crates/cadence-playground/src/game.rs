use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};

use cadence_engine::core::{ExitRequest, Game, Services};
use cadence_engine::task::{defer, TaskCtx};
use cadence_engine::tick::TickableRegistry;

use crate::assets::AssetDatabase;
use crate::stage::{play, play_all, Stage, Tween};

const IMAGES: [&str; 5] = ["symbol.png", "symbol1.png", "symbol2.png", "symbol3.png", "symbol4.png"];
const X_OFFSET: f32 = 160.0;

/// Demo game: loads a stage of images off-thread, lays the sprites out in a
/// row, fades them, then scales a fresh sprite from its center.
pub struct Playground {
    assets: Rc<AssetDatabase>,
    stage: Rc<Stage>,
    registry: Rc<TickableRegistry>,
    exit: Rc<ExitRequest>,
}

impl Game for Playground {
    const NAME: &'static str = "Cadence Playground";

    fn create(services: &Services) -> Result<Self> {
        Ok(Self {
            assets: services.require::<AssetDatabase>()?,
            stage: services.require::<Stage>()?,
            registry: services.require::<TickableRegistry>()?,
            exit: services.require::<ExitRequest>()?,
        })
    }

    fn load(self: Rc<Self>, ctx: TaskCtx) -> impl Future<Output = Result<()>> + 'static {
        async move {
            log::info!("loading game assets");
            let op = self.assets.load_stage(&IMAGES);

            // Progress reporter; stops on its own once the stage is done.
            let watched = op.clone();
            ctx.start("load-progress", move |ctx| async move {
                while !watched.is_complete() {
                    log::info!("loading: {:>3.0}%", watched.progress() * 100.0);
                    ctx.delay(Duration::from_millis(250)).await?;
                }
                Ok(())
            })?;

            ctx.external(&op).await.context("main asset stage")?;
            log::info!("game assets loaded");
            Ok(())
        }
    }

    fn activate(self: Rc<Self>, ctx: TaskCtx) -> impl Future<Output = Result<()>> + 'static {
        async move {
            log::info!("activating game");
            let exit = self.exit.clone();
            let _quit = defer(move || exit.request());

            self.lay_out_row(&ctx).await?;
            self.scale_from_center(&ctx).await?;

            log::info!("demo finished");
            Ok(())
        }
    }
}

impl Playground {
    async fn lay_out_row(&self, ctx: &TaskCtx) -> Result<()> {
        let sprites: Vec<_> = IMAGES
            .iter()
            .filter(|image| self.assets.is_loaded(image))
            .map(|image| self.stage.spawn(image.trim_end_matches(".png")))
            .collect();

        ctx.delay_secs(1.0).await?;

        let slide: Vec<Tween> = sprites
            .iter()
            .enumerate()
            .map(|(i, sprite)| {
                let sprite = sprite.clone();
                Tween::new(0.0, X_OFFSET * i as f32, Duration::from_millis(500), move |x| sprite.x.set(x))
            })
            .collect();
        play_all(ctx, &self.registry, slide).await?;

        ctx.delay_secs(0.5).await?;

        let fade: Vec<Tween> = sprites
            .iter()
            .map(|sprite| {
                let sprite = sprite.clone();
                Tween::new(1.0, 0.0, Duration::from_millis(500), move |a| sprite.alpha.set(a))
            })
            .collect();
        play_all(ctx, &self.registry, fade).await?;
        Ok(())
    }

    async fn scale_from_center(&self, ctx: &TaskCtx) -> Result<()> {
        let sprite = self.stage.spawn("center");
        sprite.x.set(X_OFFSET * 2.0);

        ctx.delay_secs(1.0).await?;

        let target = sprite.clone();
        play(
            ctx,
            &self.registry,
            Tween::new(1.0, 1.2, Duration::from_secs(3), move |s| target.scale.set(s)),
        )
        .await?;
        Ok(())
    }
}
