//! Latching thresholds with separate engage and release points.

/// A latch that engages on one condition and releases on another.
///
/// While neither condition holds the previous state is kept, so a value
/// sitting inside the band never toggles the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hysteresis {
    engaged: bool,
}

impl Hysteresis {
    pub const fn new() -> Self {
        Self { engaged: false }
    }

    /// Engage when `value` rises above `rising`, release when it drops
    /// below `falling`.
    pub fn test(&mut self, value: f32, rising: f32, falling: f32) -> bool {
        self.test_conditions(value > rising, value < falling)
    }

    /// Engage when `rising` holds, release when `falling` holds.
    /// `rising` wins if both hold in the same sample.
    pub fn test_conditions(&mut self, rising: bool, falling: bool) -> bool {
        if rising {
            self.engaged = true;
        } else if falling {
            self.engaged = false;
        }
        self.engaged
    }

    /// Engage above `limit`; release once the value drops `hysteresis`
    /// below it.
    pub fn check_limit_exceeded(&mut self, value: f32, limit: f32, hysteresis: f32) -> bool {
        if self.engaged {
            if value <= limit - hysteresis {
                self.engaged = false;
            }
        } else if value > limit {
            self.engaged = true;
        }
        self.engaged
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn reset(&mut self) {
        self.engaged = false;
    }
}
