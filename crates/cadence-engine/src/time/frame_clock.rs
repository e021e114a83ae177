use std::time::{Duration, Instant};

use super::smoothing::DemaFilter;

/// Frame clock configuration.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Upper bound for a single raw delta before filtering.
    ///
    /// The default (about 133 ms) is a floor of roughly 8 fps, so one long stall
    /// (tab switch, debugger, GC pause) cannot drag the filter with it.
    pub max_delta: Duration,

    /// Number of samples the EMA is taken over.
    pub ema_period: u32,

    /// DEMA response to linear trends, in `[0, 1]`.
    pub dema_weight: f64,

    /// How many generalized DEMA passes are chained.
    pub passes: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_delta: Duration::from_micros(133_333),
            ema_period: 5,
            dema_weight: 0.7,
            passes: 3,
        }
    }
}

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct FrameSample {
    /// Delta handed to the clock, in milliseconds, before any sanitizing.
    pub raw_delta_ms: f64,

    /// Delta after clamping, in seconds.
    pub clamped_delta_sec: f64,

    /// Jitter-filtered delta in seconds. This is what tickables receive.
    pub smoothed_delta_sec: f64,

    /// Monotonic frame counter; the first tick is frame 0.
    pub frame_index: u64,

    /// Monotonic clock time in seconds, accumulated from clamped deltas.
    pub time_sec: f64,
}

/// Frame clock producing smoothed per-frame deltas.
///
/// One clock per loop. The clock owns the filter state; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct FrameClock {
    max_delta_sec: f64,
    filter: DemaFilter,
    sample: FrameSample,
    frames: u64,
    time_sec: f64,
    last: Option<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_config(ClockConfig::default())
    }

    pub fn with_config(config: ClockConfig) -> Self {
        Self {
            max_delta_sec: config.max_delta.as_secs_f64(),
            filter: DemaFilter::new(config.ema_period, config.dema_weight, config.passes),
            sample: FrameSample::default(),
            frames: 0,
            time_sec: 0.0,
            last: None,
        }
    }

    /// Advances the clock by a raw delta (milliseconds) and returns the
    /// smoothed delta in seconds.
    ///
    /// Negative and NaN deltas count as zero; anything above the cap counts as
    /// exactly the cap.
    pub fn tick(&mut self, raw_delta_ms: f64) -> f64 {
        let clamped = (raw_delta_ms * 0.001).max(0.0).min(self.max_delta_sec);
        let smoothed = self.filter.apply(clamped);

        self.time_sec += clamped;
        self.sample = FrameSample {
            raw_delta_ms,
            clamped_delta_sec: clamped,
            smoothed_delta_sec: smoothed,
            frame_index: self.frames,
            time_sec: self.time_sec,
        };
        self.frames = self.frames.wrapping_add(1);

        smoothed
    }

    /// Measures the delta since the previous call with `Instant` and ticks.
    ///
    /// The first call after construction or `reset` measures zero.
    pub fn tick_now(&mut self) -> FrameSample {
        let now = Instant::now();
        let raw_ms = match self.last {
            Some(last) => now.saturating_duration_since(last).as_secs_f64() * 1000.0,
            None => 0.0,
        };
        self.last = Some(now);
        self.tick(raw_ms);
        self.sample
    }

    /// Most recent sample.
    #[inline]
    pub fn sample(&self) -> FrameSample {
        self.sample
    }

    /// Monotonic clock time in seconds.
    #[inline]
    pub fn now_sec(&self) -> f64 {
        self.time_sec
    }

    /// Number of ticks since construction (or the last reset).
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Clears filter state and the `Instant` baseline.
    ///
    /// The timestamp keeps counting; it never goes backwards.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.last = None;
        self.frames = 0;
        self.sample = FrameSample {
            time_sec: self.time_sec,
            ..FrameSample::default()
        };
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
