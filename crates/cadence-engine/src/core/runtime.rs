use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::task::{ContextId, Scheduler, SchedulerConfig, TaskHandle};
use crate::tick::TickableRegistry;
use crate::time::{ClockConfig, FrameClock, FrameSample};

use super::game::Game;
use super::services::Services;

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub clock: ClockConfig,
    pub scheduler: SchedulerConfig,
}

/// Consumer of the per-frame delta, called after the tick and resume passes.
///
/// A render step only reads state; it must not call back into the scheduler.
pub trait RenderStep {
    fn render(&mut self, dt_sec: f64);
}

impl<F> RenderStep for F
where
    F: FnMut(f64),
{
    fn render(&mut self, dt_sec: f64) {
        self(dt_sec)
    }
}

/// Shared "please stop the loop" flag.
///
/// Registered as a service so game code can end the host loop.
#[derive(Debug, Clone, Default)]
pub struct ExitRequest(Rc<Cell<bool>>);

impl ExitRequest {
    pub fn request(&self) {
        self.0.set(true);
    }

    pub fn is_requested(&self) -> bool {
        self.0.get()
    }
}

/// A game started by [`Runtime::launch`].
pub struct Launched<G> {
    pub game: Rc<G>,
    pub task: TaskHandle,
    pub context: ContextId,
}

/// Frame driver: owns the clock, the tickable registry, the scheduler, the
/// services and the render step.
///
/// One call to [`frame`](Self::frame) is one full tick:
///
/// 1. the clock filters the raw delta
/// 2. terminal tasks are reaped, every tickable is ticked, resolved tasks resume
/// 3. the render step receives the same smoothed delta
///
/// While paused the clock keeps filtering but nothing is ticked or rendered.
pub struct Runtime {
    clock: FrameClock,
    registry: TickableRegistry,
    scheduler: Scheduler,
    services: Services,
    renderer: Option<Box<dyn RenderStep>>,
    exit: ExitRequest,
    paused: bool,
}

impl Runtime {
    /// Creates the runtime and registers the built-in services:
    /// [`TickableRegistry`], [`WeakScheduler`](crate::task::WeakScheduler) and
    /// [`ExitRequest`].
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let registry = TickableRegistry::new();
        let scheduler = Scheduler::new(registry.clone(), config.scheduler);
        let exit = ExitRequest::default();

        let services = Services::new();
        services
            .provide(registry.clone())
            .and_then(|_| services.provide(scheduler.downgrade()))
            .and_then(|_| services.provide(exit.clone()))
            .context("failed to register built-in services")?;

        Ok(Self {
            clock: FrameClock::with_config(config.clock),
            registry,
            scheduler,
            services,
            renderer: None,
            exit,
            paused: false,
        })
    }

    pub fn with_renderer<R: RenderStep + 'static>(mut self, renderer: R) -> Self {
        self.set_renderer(renderer);
        self
    }

    pub fn set_renderer<R: RenderStep + 'static>(&mut self, renderer: R) {
        self.renderer = Some(Box::new(renderer));
    }

    // ── accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    #[inline]
    pub fn registry(&self) -> &TickableRegistry {
        &self.registry
    }

    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[inline]
    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn exit_request(&self) -> ExitRequest {
        self.exit.clone()
    }

    pub fn should_exit(&self) -> bool {
        self.exit.is_requested()
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Runs one frame from a raw delta in milliseconds.
    pub fn frame(&mut self, raw_delta_ms: f64) -> FrameSample {
        let dt_sec = self.clock.tick(raw_delta_ms);
        self.advance(dt_sec);
        self.clock.sample()
    }

    /// Runs one frame, measuring the delta with the clock's own `Instant`.
    pub fn frame_now(&mut self) -> FrameSample {
        let sample = self.clock.tick_now();
        self.advance(sample.smoothed_delta_sec);
        sample
    }

    fn advance(&mut self, dt_sec: f64) {
        if self.paused {
            return;
        }

        // The filter may undershoot slightly below zero after a sharp drop.
        let dt = Duration::try_from_secs_f64(dt_sec.max(0.0)).unwrap_or(Duration::ZERO);
        self.scheduler.step(dt);

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(dt_sec);
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            log::info!("runtime paused");
            self.paused = true;
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            log::info!("runtime resumed");
            self.paused = false;
        }
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // ── games ─────────────────────────────────────────────────────────────

    /// Creates `G` from the registered services and starts its task
    /// (`load`, then `activate`) in a context named `G::NAME`.
    pub fn launch<G: Game>(&self) -> Result<Launched<G>> {
        let game = Rc::new(
            G::create(&self.services).with_context(|| format!("failed to create game `{}`", G::NAME))?,
        );
        let context = self.scheduler.create_context(G::NAME);

        let main = game.clone();
        let task = self.scheduler.start(context, "main", move |ctx| async move {
            main.clone()
                .load(ctx.clone())
                .await
                .with_context(|| format!("{} failed to load", G::NAME))?;
            log::info!("{} loaded", G::NAME);
            main.activate(ctx).await
        });

        log::info!("launched {}", G::NAME);
        Ok(Launched {
            game,
            task,
            context,
        })
    }
}
