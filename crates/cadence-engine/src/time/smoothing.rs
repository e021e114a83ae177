/// Generalized double-exponential moving average, applied in several passes.
///
/// Every pass computes
///
/// ```text
/// ema(x) = 2 / (N + 1) * (x - prev) + prev
/// gd(x)  = ema(x) * (1 + w) - ema(ema(x)) * w
/// ```
///
/// where `prev` is the previous output of the whole chain. `prev` stays fixed
/// for the duration of one `apply` call and is the filter's only state.
///
/// With `w = 0` a pass is a plain EMA, with `w = 1` it is a full DEMA. Chaining
/// passes suppresses single-frame spikes while still following sustained
/// slowdowns.
#[derive(Debug, Clone)]
pub struct DemaFilter {
    alpha: f64,
    weight: f64,
    passes: u32,
    value: f64,
}

impl DemaFilter {
    /// Creates a filter averaging over `period` samples.
    ///
    /// `weight` is clamped to `[0, 1]`; `period` and `passes` are at least 1.
    pub fn new(period: u32, weight: f64, passes: u32) -> Self {
        let period = period.max(1) as f64;
        Self {
            alpha: 2.0 / (period + 1.0),
            weight: weight.clamp(0.0, 1.0),
            passes: passes.max(1),
            value: 0.0,
        }
    }

    /// Last filtered value (0 before the first sample).
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Clears the running state back to 0.
    pub fn reset(&mut self) {
        self.value = 0.0;
    }

    /// Feeds one sample and returns the new filtered value.
    pub fn apply(&mut self, sample: f64) -> f64 {
        let mut v = sample;
        for _ in 0..self.passes {
            v = self.gd(v);
        }
        self.value = v;
        v
    }

    #[inline]
    fn ema(&self, x: f64) -> f64 {
        self.alpha * (x - self.value) + self.value
    }

    #[inline]
    fn gd(&self, x: f64) -> f64 {
        let once = self.ema(x);
        once * (1.0 + self.weight) - self.ema(once) * self.weight
    }
}
