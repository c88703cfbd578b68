//! One-shot throttle position sensor calibration sweep.
//!
//! [`AutocalOverlay`] wraps a controller for one cycle.  When a sweep has
//! been requested it takes the motor for the whole (blocking) sweep and
//! skips the regular update; otherwise it delegates straight to
//! [`ThrottleController::update`].  The request flag on the controller is
//! the only gate, so the two paths never drive the motor in the same cycle.
//!
//! ```text
//!   open 1 s ─▶ read max ─▶ neutral 200 ms ─▶ close 1 s ─▶ read min
//!        ─▶ disable ─▶ check span ─▶ publish 4 values (500 ms apart)
//! ```

use embedded_hal::delay::DelayNs;
use log::{error, info};

use crate::app::events::{CalMode, CalibrationEvent};
use crate::app::ports::{EventSink, MotorPort, SensorPort};
use crate::error::{AutocalError, Error};
use crate::sensors::SensorType;

use super::{EtbContext, ThrottleController, ThrottleFunction};

const SWEEP_DUTY: f32 = 0.5;
const SWEEP_HOLD_MS: u32 = 1000;
const NEUTRAL_HOLD_MS: u32 = 200;
const PUBLISH_SETTLE_MS: u32 = 500;

/// Smallest primary sensor travel (volts) that counts as a real sweep.
pub const MIN_SWEEP_VOLTS: f32 = 0.5;

/// Volts to the tuning tool's 10-bit ADC scale (5 V full range).
pub fn volts_to_adc10(volts: f32) -> f32 {
    volts * 200.0
}

/// Raw sensor readings at both ends of travel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpsCalibration {
    pub primary_max: f32,
    pub primary_min: f32,
    pub secondary_max: f32,
    pub secondary_min: f32,
}

fn cal_modes(function: ThrottleFunction) -> [CalMode; 4] {
    match function {
        ThrottleFunction::Throttle1 => [
            CalMode::Tps1Max,
            CalMode::Tps1Min,
            CalMode::Tps1SecondaryMax,
            CalMode::Tps1SecondaryMin,
        ],
        _ => [
            CalMode::Tps2Max,
            CalMode::Tps2Min,
            CalMode::Tps2SecondaryMax,
            CalMode::Tps2SecondaryMin,
        ],
    }
}

pub struct AutocalOverlay<'c, M: MotorPort> {
    etb: &'c mut ThrottleController<M>,
}

impl<'c, M: MotorPort> AutocalOverlay<'c, M> {
    pub fn new(etb: &'c mut ThrottleController<M>) -> Self {
        Self { etb }
    }

    /// Run the sweep if one is pending, else the normal control cycle.
    pub fn update<S: SensorPort>(
        &mut self,
        ctx: &EtbContext<'_, S>,
        delay: &mut impl DelayNs,
        sink: &mut impl EventSink,
    ) -> Option<f32> {
        if !self.etb.autocal_requested {
            return self.etb.update(ctx, sink);
        }

        let result = self.sweep(ctx.sensors, delay, sink);
        self.etb.autocal_requested = false;

        match result {
            Ok(cal) => info!(
                "ETB{} autocal done: primary {:.2}..{:.2}V secondary {:.2}..{:.2}V",
                self.etb.index + 1,
                cal.primary_min,
                cal.primary_max,
                cal.secondary_min,
                cal.secondary_max,
            ),
            Err(e) => error!("ETB{} autocal failed: {e}", self.etb.index + 1),
        }
        None
    }

    /// Drive the plate to both stops and publish the raw readings.
    pub fn sweep(
        &mut self,
        sensors: &impl SensorPort,
        delay: &mut impl DelayNs,
        sink: &mut impl EventSink,
    ) -> Result<TpsCalibration, Error> {
        if sensors.get_or_zero(SensorType::Rpm) > 0.0 {
            return Err(AutocalError::EngineRunning.into());
        }
        if !self.etb.armed {
            return Err(AutocalError::NoMotor.into());
        }
        let function = self.etb.function;
        if !function.is_etb() {
            return Err(AutocalError::NotAThrottle.into());
        }

        info!("ETB{} autocal starting", self.etb.index + 1);
        let primary = function.tps_primary();
        let secondary = function.tps_secondary();
        let motor = &mut self.etb.motor;

        // Open
        motor.set(SWEEP_DUTY);
        motor.enable();
        delay.delay_ms(SWEEP_HOLD_MS);
        let primary_max = sensors.get_raw(primary);
        let secondary_max = sensors.get_raw(secondary);

        // Let it return
        motor.set(0.0);
        delay.delay_ms(NEUTRAL_HOLD_MS);

        // Closed
        motor.set(-SWEEP_DUTY);
        delay.delay_ms(SWEEP_HOLD_MS);
        let primary_min = sensors.get_raw(primary);
        let secondary_min = sensors.get_raw(secondary);

        motor.disable("autotune");

        if (primary_max - primary_min).abs() < MIN_SWEEP_VOLTS {
            return Err(AutocalError::SweepTooSmall {
                open: primary_max,
                closed: primary_min,
            }
            .into());
        }

        let cal = TpsCalibration {
            primary_max,
            primary_min,
            secondary_max,
            secondary_min,
        };

        // Give the tuning tool time to latch each value
        let values = [primary_max, primary_min, secondary_max, secondary_min];
        for (mode, volts) in cal_modes(function).into_iter().zip(values) {
            self.etb.publish(
                sink,
                CalibrationEvent {
                    mode,
                    value: volts_to_adc10(volts),
                },
            );
            delay.delay_ms(PUBLISH_SETTLE_MS);
        }
        self.etb.publish(
            sink,
            CalibrationEvent {
                mode: CalMode::None,
                value: 0.0,
            },
        );

        Ok(cal)
    }
}
