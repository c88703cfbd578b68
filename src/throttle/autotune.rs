//! Relay (Åström–Hägglund) autotune.
//!
//! A bang-bang output around a fixed target makes the plate oscillate.
//! Each oscillation yields a period `tu` and peak-to-peak amplitude `a`;
//! from those the ultimate gain `ku = 4b / (π·a)` gives PID estimates.
//! The estimates are only published for the operator, never applied.

use core::f32::consts::PI;

use crate::app::events::{CalMode, CalibrationEvent};
use crate::control::timer::{Micros, Timer};

/// Relay output magnitude (duty %).
pub const AUTOTUNE_AMPLITUDE: f32 = 20.0;

/// Smoothing for the noisy per-cycle estimates.
const FILTER_ALPHA: f32 = 0.05;

/// Cycles spent publishing each of P, I, D before moving on.
const CYCLES_PER_PARAM: u8 = 5;

/// Gains derived from the current amplitude/period estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutotuneGains {
    pub ku: f32,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl AutotuneGains {
    /// Ziegler–Nichols style gains from the relay amplitude `b`, plate
    /// amplitude `a` and period `tu`.
    pub fn from_relay(b: f32, a: f32, tu: f32) -> Option<Self> {
        if a <= 0.0 || tu <= 0.0 {
            return None;
        }
        let ku = 4.0 * b / (PI * a);
        Some(Self {
            ku,
            kp: 0.35 * ku,
            ki: 0.25 * ku / tu,
            kd: 0.08 * ku * tu,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RelayAutotune {
    last_is_positive: bool,
    cycle_start: Timer,
    min_cycle_tps: f32,
    max_cycle_tps: f32,
    /// Filtered amplitude (% TPS).
    a: f32,
    /// Filtered period (seconds).
    tu: f32,
    counter: u8,
    current_param: u8,
    gains: Option<AutotuneGains>,
}

impl Default for RelayAutotune {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayAutotune {
    pub const fn new() -> Self {
        Self {
            last_is_positive: false,
            cycle_start: Timer::new(),
            min_cycle_tps: 100.0,
            max_cycle_tps: 0.0,
            a: 0.0,
            tu: 0.0,
            counter: 0,
            current_param: 0,
            gains: None,
        }
    }

    /// Relay output for this sample, plus a calibration value to publish
    /// when an oscillation cycle just completed.
    pub fn output(&mut self, target: f32, observed: f32, now: Micros) -> (f32, Option<CalibrationEvent>) {
        let is_positive = observed > target;
        let mut published = None;

        // Falling edge closes a cycle
        if !is_positive && self.last_is_positive {
            published = self.end_cycle(now);
        }
        self.last_is_positive = is_positive;

        self.min_cycle_tps = self.min_cycle_tps.min(observed);
        self.max_cycle_tps = self.max_cycle_tps.max(observed);

        let output = if is_positive {
            -AUTOTUNE_AMPLITUDE
        } else {
            AUTOTUNE_AMPLITUDE
        };
        (output, published)
    }

    fn end_cycle(&mut self, now: Micros) -> Option<CalibrationEvent> {
        let period = self.cycle_start.elapsed_secs_and_reset(now);
        let amplitude = self.max_cycle_tps - self.min_cycle_tps;
        self.min_cycle_tps = 100.0;
        self.max_cycle_tps = 0.0;

        // The first edge only starts the clock
        let tu = period?;

        self.a = FILTER_ALPHA * amplitude + (1.0 - FILTER_ALPHA) * self.a;
        self.tu = FILTER_ALPHA * tu + (1.0 - FILTER_ALPHA) * self.tu;

        let gains = AutotuneGains::from_relay(2.0 * AUTOTUNE_AMPLITUDE, self.a, self.tu)?;
        self.gains = Some(gains);

        if self.counter >= CYCLES_PER_PARAM {
            self.counter = 0;
            self.current_param = (self.current_param + 1) % 3;
        }
        self.counter += 1;

        let value = match self.current_param {
            0 => gains.kp,
            1 => gains.ki,
            _ => gains.kd,
        };
        Some(CalibrationEvent {
            mode: CalMode::for_autotune_param(self.current_param),
            value,
        })
    }

    pub fn amplitude(&self) -> f32 {
        self.a
    }

    pub fn period(&self) -> f32 {
        self.tu
    }

    pub fn gains(&self) -> Option<AutotuneGains> {
        self.gains
    }
}
