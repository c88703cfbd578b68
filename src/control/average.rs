//! Running averages and error integrators used for diagnostics.

/// Exponential moving average with an "N-sample" smoothing factor.
#[derive(Debug, Clone)]
pub struct ExpAverage {
    smoothing: f32,
    current: f32,
}

impl ExpAverage {
    pub fn new(length: u16) -> Self {
        let mut avg = Self {
            smoothing: 1.0,
            current: 0.0,
        };
        avg.init(length);
        avg
    }

    /// Re-derive the smoothing factor from an averaging length.
    pub fn init(&mut self, length: u16) {
        self.smoothing = 2.0 / (f32::from(length.max(1)) + 1.0);
    }

    /// Feed a sample and return the updated average.
    pub fn average(&mut self, value: f32) -> f32 {
        self.current = self.smoothing * value + (1.0 - self.smoothing) * self.current;
        self.current
    }

    pub fn reset(&mut self) {
        self.current = 0.0;
    }

    pub fn current(&self) -> f32 {
        self.current
    }
}

/// Integrates absolute error above a dead-band over time.
///
/// Error below the dead-band bleeds the integral down; the integral never
/// goes negative.
#[derive(Debug, Clone, Default)]
pub struct ErrorAccumulator {
    ignore_error: f32,
    dt: f32,
    integral: f32,
}

impl ErrorAccumulator {
    pub fn init(&mut self, ignore_error: f32, dt: f32) {
        self.ignore_error = ignore_error;
        self.dt = dt;
        self.integral = 0.0;
    }

    pub fn accumulate(&mut self, error: f32) -> f32 {
        let rate = error.abs() - self.ignore_error;
        self.integral = (self.integral + rate * self.dt).max(0.0);
        self.integral
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }
}
