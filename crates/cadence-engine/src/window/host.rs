use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::core::Runtime;

/// Window / loop configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,

    /// Target frames per second; `0` redraws as fast as the platform allows.
    pub framerate: u32,

    /// Keep ticking while the window is unfocused.
    pub run_in_background: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "cadence".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            framerate: 60,
            run_in_background: false,
        }
    }
}

impl WindowConfig {
    /// Time between frames at the configured framerate.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.framerate > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(self.framerate)))
    }
}

/// Platform loop: one window, one [`Runtime::frame_now`] per redraw.
pub struct WindowHost;

impl WindowHost {
    /// Runs until the window closes or the runtime requests exit.
    pub fn run(config: WindowConfig, runtime: Runtime) -> Result<()> {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = HostState::new(config, runtime);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        state.failure.map_or(Ok(()), Err)
    }
}

struct HostState {
    config: WindowConfig,
    runtime: Runtime,
    window: Option<Window>,
    next_frame: Instant,
    failure: Option<anyhow::Error>,
}

impl HostState {
    fn new(config: WindowConfig, runtime: Runtime) -> Self {
        Self {
            config,
            runtime,
            window: None,
            next_frame: Instant::now(),
            failure: None,
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn request_redraw(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn on_focus(&mut self, focused: bool) {
        if self.config.run_in_background {
            return;
        }
        if focused {
            self.runtime.resume();
        } else {
            self.runtime.pause();
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let sample = self.runtime.frame_now();
        log::trace!(
            "frame {} dt {:.4}s (raw {:.2}ms)",
            sample.frame_index,
            sample.smoothed_delta_sec,
            sample.raw_delta_ms
        );

        if let Some(interval) = self.config.frame_interval() {
            self.next_frame = Instant::now() + interval;
        }

        if self.runtime.should_exit() {
            log::info!("exit requested by the runtime");
            event_loop.exit();
        }
    }
}

impl ApplicationHandler for HostState {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, cause: StartCause) {
        if let StartCause::ResumeTimeReached { .. } = cause {
            self.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.create_window(event_loop) {
            log::error!("failed to create window: {e:#}");
            self.failure = Some(e);
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.runtime.should_exit() {
            event_loop.exit();
            return;
        }

        match self.config.frame_interval() {
            Some(_) => event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame)),
            None => {
                event_loop.set_control_flow(ControlFlow::Poll);
                self.request_redraw();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("window closed");
                self.window = None;
                event_loop.exit();
            }
            WindowEvent::Focused(focused) => self.on_focus(focused),
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => self.request_redraw(),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }
}
