//! Start/stop button and engine-stop sequencing.
//!
//! A single momentary button cranks a stopped engine and stops a running
//! one.  Stopping is handled by [`ShutdownController`]: a stop request
//! keeps fuel cut (via the limp manager) for a fixed window.
//!
//! ```text
//!   press ──▶ stopped? ──▶ starter relay on ──▶ running or timeout ──▶ off
//!         └─▶ running? ──▶ schedule engine stop
//! ```

use embedded_hal::digital::{InputPin, OutputPin};
use log::info;

use crate::config::StartStopConfig;
use crate::control::timer::{MICROS_PER_SECOND, Micros, Timer};
use crate::engine::EngineState;
use crate::error::{ActuatorError, Error, Result, SensorError};

// ───────────────────────────────────────────────────────────────
// Shutdown
// ───────────────────────────────────────────────────────────────

/// Tracks an in-progress engine-stop request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    stop_requested: Timer,
}

impl ShutdownController {
    pub const fn new() -> Self {
        Self {
            stop_requested: Timer::new(),
        }
    }

    pub fn schedule_stop_engine(&mut self, now: Micros) {
        info!("Engine stop requested");
        self.stop_requested.reset(now);
    }

    /// True for `duration_secs` after the last stop request.
    pub fn is_engine_stop(&self, now: Micros, duration_secs: f32) -> bool {
        self.stop_requested.is_started() && !self.stop_requested.has_elapsed_secs(now, duration_secs)
    }
}

// ───────────────────────────────────────────────────────────────
// Button
// ───────────────────────────────────────────────────────────────

/// Debounced start/stop button driving the starter relay.
pub struct StartStopButton<B: InputPin, R: OutputPin> {
    button: B,
    starter: R,
    debounce_us: Micros,
    cranking_duration_secs: f32,

    /// Raw level and when it last changed.
    raw_state: bool,
    raw_changed_at: Micros,
    /// Accepted (debounced) level.
    stable_state: bool,

    starter_engaged: bool,
    last_push: Option<Micros>,
    toggle_counter: u32,
}

impl<B: InputPin, R: OutputPin> StartStopButton<B, R> {
    pub fn new(button: B, starter: R, config: &StartStopConfig) -> Self {
        Self {
            button,
            starter,
            debounce_us: Micros::from(config.debounce_ms) * 1000,
            cranking_duration_secs: config.cranking_duration_secs,
            raw_state: false,
            raw_changed_at: 0,
            stable_state: false,
            starter_engaged: false,
            last_push: None,
            toggle_counter: 0,
        }
    }

    pub fn on_configuration_change(&mut self, config: &StartStopConfig) {
        self.debounce_us = Micros::from(config.debounce_ms) * 1000;
        self.cranking_duration_secs = config.cranking_duration_secs;
    }

    /// Call from the slow callback.  `rpm` zero means stopped.
    pub fn tick(
        &mut self,
        now: Micros,
        rpm: f32,
        engine: &EngineState,
        shutdown: &mut ShutdownController,
    ) -> Result<()> {
        let pressed = self.read_debounced(now)?;

        // rising edge only
        if pressed && !self.stable_state {
            self.on_toggle(now, rpm, engine, shutdown)?;
        }
        self.stable_state = pressed;

        if self.last_push.is_none() {
            return Ok(());
        }

        if engine.is_running && self.set_starter(false)? {
            info!("Engine running, starter disengaged");
            self.last_push = None;
        }

        if let Some(pushed) = self.last_push {
            let cranking_us = (self.cranking_duration_secs * MICROS_PER_SECOND) as Micros;
            if now.saturating_sub(pushed) > cranking_us && self.set_starter(false)? {
                info!("Cranking timeout {:.0} seconds", self.cranking_duration_secs);
                self.last_push = None;
            }
        }
        Ok(())
    }

    fn on_toggle(
        &mut self,
        now: Micros,
        rpm: f32,
        engine: &EngineState,
        shutdown: &mut ShutdownController,
    ) -> Result<()> {
        self.toggle_counter = self.toggle_counter.wrapping_add(1);

        if rpm == 0.0 {
            let was_engaged = self.set_starter(true)?;
            if !was_engaged {
                self.last_push = Some(now);
                info!("Cranking for up to {:.0} seconds", self.cranking_duration_secs);
            }
        } else if engine.is_running {
            shutdown.schedule_stop_engine(now);
        }
        Ok(())
    }

    /// Accept a new level only once it has held for the debounce window.
    fn read_debounced(&mut self, now: Micros) -> Result<bool> {
        let raw = self
            .button
            .is_high()
            .map_err(|_| Error::Sensor(SensorError::Invalid))?;
        if raw != self.raw_state {
            self.raw_state = raw;
            self.raw_changed_at = now;
        }
        if now.saturating_sub(self.raw_changed_at) >= self.debounce_us {
            Ok(self.raw_state)
        } else {
            Ok(self.stable_state)
        }
    }

    /// Drive the starter relay; returns whether it was engaged before.
    fn set_starter(&mut self, engage: bool) -> Result<bool> {
        let was = self.starter_engaged;
        if was != engage {
            let r = if engage {
                self.starter.set_high()
            } else {
                self.starter.set_low()
            };
            r.map_err(|_| ActuatorError::GpioWriteFailed)?;
            self.starter_engaged = engage;
        }
        Ok(was)
    }

    pub fn is_starter_engaged(&self) -> bool {
        self.starter_engaged
    }

    pub fn toggle_count(&self) -> u32 {
        self.toggle_counter
    }
}
