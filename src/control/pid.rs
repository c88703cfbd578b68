//! PID controller for throttle plate position
//!
//! Proportional-integral-derivative controller with a clamped integrator
//! and clamped output. Gains come from [`PidParams`], which are compared by
//! value on configuration reload.

use serde::{Deserialize, Serialize};

/// Tunable PID parameters, as stored in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub p_factor: f32,
    pub i_factor: f32,
    pub d_factor: f32,
    /// Constant added to every output.
    pub offset: f32,
    /// Nominal update period in milliseconds (informational).
    pub period_ms: f32,
    pub min_value: f32,
    pub max_value: f32,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            p_factor: 1.0,
            i_factor: 10.0,
            d_factor: 0.05,
            offset: 0.0,
            period_ms: 0.0,
            min_value: -100.0,
            max_value: 100.0,
        }
    }
}

/// PID controller
#[derive(Debug, Clone)]
pub struct Pid {
    params: PidParams,
    /// Lower clamp of the integral term.
    pub i_term_min: f32,
    /// Upper clamp of the integral term.
    pub i_term_max: f32,
    i_term: f32,
    prev_error: f32,
    first_run: bool,
}

impl Default for Pid {
    fn default() -> Self {
        Self::new(PidParams::default())
    }
}

impl Pid {
    pub fn new(params: PidParams) -> Self {
        Self {
            params,
            i_term_min: -1_000_000.0,
            i_term_max: 1_000_000.0,
            i_term: 0.0,
            prev_error: 0.0,
            first_run: true,
        }
    }

    /// Replace the parameters and clear accumulated state.
    pub fn init_pid_class(&mut self, params: &PidParams) {
        self.params = *params;
        self.reset();
    }

    /// True if `other` holds the same gains and limits as this controller.
    pub fn is_same(&self, other: &PidParams) -> bool {
        self.params == *other
    }

    pub fn params(&self) -> &PidParams {
        &self.params
    }

    /// Compute output given the target and the observed plant value.
    pub fn get_output(&mut self, target: f32, observation: f32, period_secs: f32) -> f32 {
        let error = target - observation;

        // Proportional
        let p = self.params.p_factor * error;

        // Integral (clamped)
        self.i_term += period_secs * self.params.i_factor * error;
        self.i_term = self.i_term.max(self.i_term_min).min(self.i_term_max);

        // Derivative, skipped on the first sample after reset
        let d = if self.first_run || period_secs <= 0.0 {
            0.0
        } else {
            self.params.d_factor * (error - self.prev_error) / period_secs
        };

        self.prev_error = error;
        self.first_run = false;

        let output = p + self.i_term + d + self.params.offset;

        // Clamp output
        let clamped = output.max(self.params.min_value).min(self.params.max_value);

        // Anti-windup: if output is saturated, undo this sample's integration
        if clamped != output {
            self.i_term -= period_secs * self.params.i_factor * error;
        }

        clamped
    }

    /// Current value of the integral term.
    pub fn integration(&self) -> f32 {
        self.i_term
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.i_term = 0.0;
        self.prev_error = 0.0;
        self.first_run = true;
    }
}
