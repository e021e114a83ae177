use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use cadence_engine::task::TaskCtx;
use cadence_engine::tick::{Tickable, TickableRegistry};
use cadence_engine::wait::WaitError;

/// Stand-in for a renderable: just the properties the demo animates.
#[derive(Debug)]
pub struct Sprite {
    pub name: String,
    pub x: Cell<f32>,
    pub alpha: Cell<f32>,
    pub scale: Cell<f32>,
}

impl Sprite {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            x: Cell::new(0.0),
            alpha: Cell::new(1.0),
            scale: Cell::new(1.0),
        }
    }
}

/// Scene contents shared between the game and the render step.
#[derive(Debug, Default)]
pub struct Stage {
    sprites: RefCell<Vec<Rc<Sprite>>>,
}

impl Stage {
    pub fn spawn(&self, name: &str) -> Rc<Sprite> {
        let sprite = Rc::new(Sprite::new(name));
        self.sprites.borrow_mut().push(sprite.clone());
        sprite
    }

    pub fn len(&self) -> usize {
        self.sprites.borrow().len()
    }

    /// One line per sprite, as the text "renderer" prints it.
    pub fn describe(&self) -> Vec<String> {
        self.sprites
            .borrow()
            .iter()
            .map(|s| {
                format!(
                    "{:<8} x={:>7.1} alpha={:.2} scale={:.2}",
                    s.name,
                    s.x.get(),
                    s.alpha.get(),
                    s.scale.get()
                )
            })
            .collect()
    }
}

/// Linear interpolation of one property, advanced by the frame tick.
pub struct Tween {
    from: f32,
    to: f32,
    duration: Duration,
    elapsed: Duration,
    apply: Box<dyn FnMut(f32)>,
}

impl Tween {
    pub fn new(from: f32, to: f32, duration: Duration, apply: impl FnMut(f32) + 'static) -> Self {
        Self {
            from,
            to,
            duration,
            elapsed: Duration::ZERO,
            apply: Box::new(apply),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }
}

impl Tickable for Tween {
    fn tick(&mut self, dt: Duration) {
        if self.is_finished() {
            return;
        }
        self.elapsed = (self.elapsed + dt).min(self.duration);
        let t = if self.duration.is_zero() {
            1.0
        } else {
            self.elapsed.as_secs_f32() / self.duration.as_secs_f32()
        };
        (self.apply)(self.from + (self.to - self.from) * t);
    }
}

/// Runs `tween` on the registry and suspends until it finishes.
pub async fn play(ctx: &TaskCtx, registry: &TickableRegistry, tween: Tween) -> Result<(), WaitError> {
    let tween = Rc::new(RefCell::new(tween));
    registry.attach(&tween);

    let probe = tween.clone();
    let done = ctx.poll_until(move || probe.borrow().is_finished()).await;

    registry.detach(&tween);
    done
}

/// Plays several tweens at once and waits for all of them.
pub async fn play_all(ctx: &TaskCtx, registry: &TickableRegistry, tweens: Vec<Tween>) -> Result<(), WaitError> {
    let tweens: Vec<Rc<RefCell<Tween>>> = tweens.into_iter().map(|t| Rc::new(RefCell::new(t))).collect();
    for tween in &tweens {
        registry.attach(tween);
    }

    let probe = tweens.clone();
    let done = ctx
        .poll_until(move || probe.iter().all(|t| t.borrow().is_finished()))
        .await;

    for tween in &tweens {
        registry.detach(tween);
    }
    done
}
