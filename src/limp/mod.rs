//! Limp manager: the single arbiter of fuel, spark, throttle and trigger
//! permissions.
//!
//! ## Permission model
//!
//! Four **persistent** flags (injection, ignition, throttle, trigger input)
//! start allowed and can only ever be withdrawn.  [`LimpManager::fatal_error`]
//! withdraws all of them; nothing restores them short of a restart.
//!
//! Two **transient** flags (injection, ignition) are rebuilt from scratch on
//! every fast tick by [`LimpManager::update_state`].  Every veto condition is
//! evaluated each tick, so the final state is the union of every condition
//! that currently holds.  The reason reported is the last one recorded.
//!
//! Queries check the persistent flag first, then the transient one.

mod clearable;
mod hysteresis;

pub use clearable::{ClearReason, Clearable, LimpState};
pub use hysteresis::Hysteresis;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::SensorPort;
use crate::config::LimpConfig;
use crate::control::table::interpolate_clamped;
use crate::control::timer::{Micros, Timer};
use crate::engine::EngineState;
use crate::sensors::SensorType;

/// Pedal position above which cranking counts as a flood-clear request.
const CLEANUP_MODE_TPS: f32 = 90.0;

/// Oil pressure must show up this long after start.
const OIL_PRESSURE_AFTER_START_SECS: f32 = 5.0;

/// Injector duty must fall below this before a duty cut releases.
const INJECTOR_DUTY_RELEASE: f32 = 20.0;

/// The external GDI driver must talk at least this often.
const GDI_COMMS_TIMEOUT_SECS: f32 = 1.0;

/// Fault RPM ceiling applied when a throttle problem is reported.
const ETB_PROBLEM_REV_LIMIT: f32 = 1500.0;

/// Trigger wheel layout, as far as phase sync is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    FourStrokeCamSensor,
    FourStrokeCrankSensor,
    FourStrokeSymmetricalCrankSensor,
    FourStrokeThreeTimesCrankSensor,
    FourStrokeTwelveTimesCrankSensor,
    TwoStroke,
}

/// Whether the engine must wait for cam sync before firing anything.
fn no_firing_until_vvt_sync(config: &LimpConfig) -> bool {
    // V-twin MAP phase sense always waits
    if config.vvt_map_v_twin || config.is_phase_sync_required_for_ignition {
        return true;
    }

    // Symmetrical cranks cannot tell the two revolutions apart on their own
    matches!(
        config.operation_mode,
        OperationMode::FourStrokeSymmetricalCrankSensor
            | OperationMode::FourStrokeThreeTimesCrankSensor
            | OperationMode::FourStrokeTwelveTimesCrankSensor
    )
}

pub struct LimpManager {
    config: LimpConfig,

    // ── Persistent ──
    allow_injection: Clearable,
    allow_ignition: Clearable,
    allow_etb: Clearable,
    allow_trigger_input: Clearable,

    // ── Recomputed every fast tick ──
    transient_allow_injection: Clearable,
    transient_allow_ignition: Clearable,

    ignition_on: bool,

    /// Only ever decreases.
    fault_rev_limit: f32,

    rev_limit: f32,
    resume_rpm: f32,
    timing_retard: f32,
    fuel_correction: f32,

    rev_limit_hysteresis: Hysteresis,
    boost_cut_hysteresis: Hysteresis,
    injector_duty_cut_hysteresis: Hysteresis,

    had_oil_pressure_after_start: bool,
    low_oil_pressure_timer: Timer,
    injector_duty_sustained_timer: Timer,
    gdi_comms_timer: Timer,
    last_cut_timer: Timer,

    /// Cam-sync misconfiguration already reported.
    gdi_sync_warned: bool,
}

impl LimpManager {
    pub fn new(config: LimpConfig) -> Self {
        let rev_limit = config.rpm_hard_limit;
        let resume_rpm = rev_limit - config.rpm_hard_limit_hyst;
        let allow_injection = Clearable::new(config.is_injection_enabled);
        let allow_ignition = Clearable::new(config.is_ignition_enabled);

        Self {
            config,
            allow_injection: Clearable::new(true),
            allow_ignition: Clearable::new(true),
            allow_etb: Clearable::new(true),
            allow_trigger_input: Clearable::new(true),
            transient_allow_injection: allow_injection,
            transient_allow_ignition: allow_ignition,
            ignition_on: false,
            fault_rev_limit: f32::INFINITY,
            rev_limit,
            resume_rpm,
            timing_retard: 0.0,
            fuel_correction: 1.0,
            rev_limit_hysteresis: Hysteresis::new(),
            boost_cut_hysteresis: Hysteresis::new(),
            injector_duty_cut_hysteresis: Hysteresis::new(),
            had_oil_pressure_after_start: false,
            low_oil_pressure_timer: Timer::new(),
            injector_duty_sustained_timer: Timer::new(),
            gdi_comms_timer: Timer::new(),
            last_cut_timer: Timer::new(),
            gdi_sync_warned: false,
        }
    }

    /// Swap in new calibration.  Latched faults and timers are kept.
    pub fn on_configuration_change(&mut self, config: &LimpConfig) {
        self.config = config.clone();
    }

    pub fn config(&self) -> &LimpConfig {
        &self.config
    }

    // ── Inputs ────────────────────────────────────────────────

    pub fn on_ignition_state_changed(&mut self, ignition_on: bool) {
        if ignition_on != self.ignition_on {
            info!("Limp: ignition {}", if ignition_on { "on" } else { "off" });
        }
        self.ignition_on = ignition_on;
    }

    /// A frame arrived from the external GDI driver.
    pub fn on_gdi_comms(&mut self, now: Micros) {
        self.gdi_comms_timer.reset(now);
    }

    // ── Per-tick evaluation ───────────────────────────────────

    /// Hard limit and the soft-limit ramp below it.
    fn update_rev_limit(&mut self, rpm: f32, sensors: &impl SensorPort) {
        self.rev_limit = if self.config.use_clt_based_rpm_limit {
            self.config
                .clt_rev_limit
                .interpolate(sensors.get_or_zero(SensorType::Clt))
        } else {
            self.config.rpm_hard_limit
        };

        // Require a configurable drop before resuming
        self.resume_rpm = self.rev_limit - self.config.rpm_hard_limit_hyst;

        self.timing_retard = interpolate_clamped(
            self.resume_rpm,
            0.0,
            self.rev_limit,
            self.config.rpm_soft_limit_timing_retard,
            rpm,
        );

        let fuel_added = interpolate_clamped(
            self.resume_rpm,
            0.0,
            self.rev_limit,
            self.config.rpm_soft_limit_fuel_added,
            rpm,
        );
        self.fuel_correction = 1.0 + fuel_added / 100.0;
    }

    /// Rebuild the transient fuel/spark permissions.  Call at the fast
    /// callback rate.  `stop_requested` reflects an engine-stop sequence in
    /// progress.
    pub fn update_state(
        &mut self,
        rpm: f32,
        now: Micros,
        sensors: &impl SensorPort,
        engine: &EngineState,
        stop_requested: bool,
    ) {
        let prev_injection = self.allow_injection();
        let prev_ignition = self.allow_ignition();

        let mut allow_fuel = Clearable::new(self.config.is_injection_enabled);
        let mut allow_spark = Clearable::new(self.config.is_ignition_enabled);

        if !self.ignition_on && !engine.self_stimulation {
            allow_fuel.clear(ClearReason::IgnitionOff);
            allow_spark.clear(ClearReason::IgnitionOff);
        }

        if self.config.is_gdi_engine
            && self.config.external_gdi_module
            && self.gdi_comms_timer.elapsed_secs(now) > GDI_COMMS_TIMEOUT_SECS
        {
            allow_fuel.clear(ClearReason::GdiComms);
        }

        if engine.lua_ignition_cut {
            allow_spark.clear(ClearReason::Lua);
        }
        if engine.lua_fuel_cut {
            allow_fuel.clear(ClearReason::Lua);
        }

        // Fuel sprays everywhere with the compression release open
        if engine.acr_active && self.config.cut_fuel_in_acr {
            allow_fuel.clear(ClearReason::Acr);
        }

        // ── Rev limit ──
        self.update_rev_limit(rpm, sensors);
        if self.rev_limit_hysteresis.test(rpm, self.rev_limit, self.resume_rpm) {
            if self.config.cut_fuel_on_hard_limit {
                allow_fuel.clear(ClearReason::HardLimit);
            }
            if self.config.cut_spark_on_hard_limit {
                allow_spark.clear(ClearReason::HardLimit);
            }
        }

        if engine.lambda_cut {
            allow_fuel.clear(ClearReason::LambdaProtection);
        }

        let gdi_unsynced = self.config.is_gdi_engine
            && !self.config.is_phase_sync_required_for_ignition
            && !self.config.vvt_map_v_twin
            && !engine.has_synchronized_phase;
        if gdi_unsynced && !self.gdi_sync_warned {
            warn!("Limp: GDI engine should require cam sync for ignition");
        }
        self.gdi_sync_warned = gdi_unsynced;
        if no_firing_until_vvt_sync(&self.config) && !engine.has_synchronized_phase {
            allow_fuel.clear(ClearReason::EnginePhase);
            allow_spark.clear(ClearReason::EnginePhase);
        }

        if rpm > self.fault_rev_limit {
            allow_fuel.clear(ClearReason::FaultRevLimit);
        }

        // ── Boost cut (fuel only, spark cut bends valves) ──
        let map_cut = self.config.boost_cut_pressure;
        if map_cut != 0.0
            && self.boost_cut_hysteresis.check_limit_exceeded(
                sensors.get_or_zero(SensorType::Map),
                map_cut,
                self.config.boost_cut_pressure_hyst,
            )
        {
            allow_fuel.clear(ClearReason::BoostCut);
        }

        // ── Oil pressure ──
        if engine.is_running {
            let oilp = sensors.get(SensorType::OilPressure).ok();
            let min_after_start = self.config.min_oil_pressure_after_start;

            if min_after_start > 0.0 && sensors.has_sensor(SensorType::OilPressure) {
                let timed_out = engine.seconds_since_engine_start > OIL_PRESSURE_AFTER_START_SECS;

                if !timed_out && oilp.is_some_and(|p| p > min_after_start) {
                    self.had_oil_pressure_after_start = true;
                }

                if timed_out && !self.had_oil_pressure_after_start {
                    allow_fuel.clear(ClearReason::OilPressure);
                }
            }

            if let Some(pressure) = oilp.filter(|_| self.config.enable_oil_pressure_protect) {
                let min_pressure = self.config.minimum_oil_pressure.interpolate(rpm);
                if pressure > min_pressure {
                    self.low_oil_pressure_timer.reset(now);
                }

                if self
                    .low_oil_pressure_timer
                    .has_elapsed_secs(now, self.config.minimum_oil_pressure_timeout_secs)
                {
                    allow_fuel.clear(ClearReason::OilPressure);
                }
            }
        } else {
            // stalled: start the checks over
            self.had_oil_pressure_after_start = false;
            self.low_oil_pressure_timer.reset(now);
        }

        // Fuel only, spark stays so the mixture in the cylinders burns off
        if stop_requested {
            allow_fuel.clear(ClearReason::StopRequested);
        }

        // ── Injector duty cycle ──
        // Instant excursion, or sustained excursion past the timeout.
        // Only releases once well below, forcing the driver off the pedal.
        {
            let duty = engine.injector_duty_cycle;
            let over_instant = duty > self.config.max_injector_duty_instant;
            let over_sustained = duty > self.config.max_injector_duty_sustained;

            if !over_sustained {
                self.injector_duty_sustained_timer.reset(now);
            }

            let sustained_timed_out = self
                .injector_duty_sustained_timer
                .has_elapsed_secs(now, self.config.max_injector_duty_sustained_timeout_secs);

            if self
                .injector_duty_cut_hysteresis
                .test_conditions(over_instant || sustained_timed_out, duty < INJECTOR_DUTY_RELEASE)
            {
                allow_fuel.clear(ClearReason::InjectorDutyCycle);
            }
        }

        // Pedal floored while cranking: clear the flood
        if !engine.is_running
            && self.config.is_cylinder_cleanup_enabled
            && sensors.get_or_zero(SensorType::DriverThrottleIntent) > CLEANUP_MODE_TPS
        {
            allow_fuel.clear(ClearReason::FloodClear);
        }

        if engine.launch_fuel_cut {
            allow_fuel.clear(ClearReason::LaunchCut);
        }
        if engine.launch_spark_cut {
            allow_spark.clear(ClearReason::LaunchCut);
        }

        self.transient_allow_injection = allow_fuel;
        self.transient_allow_ignition = allow_spark;

        if !allow_fuel.is_allowed() || !allow_spark.is_allowed() {
            self.last_cut_timer.reset(now);
        }

        log_edge("injection", prev_injection, self.allow_injection());
        log_edge("ignition", prev_ignition, self.allow_ignition());
    }

    // ── Fault reporting ───────────────────────────────────────

    /// Lower the fault RPM ceiling.  Raising it is ignored.
    pub fn set_fault_rev_limit(&mut self, limit: f32) {
        if limit < self.fault_rev_limit {
            warn!("Limp: fault rev limit {:.0} rpm", limit);
            self.fault_rev_limit = limit;
        }
    }

    /// A throttle controller has lost control of its plate.
    pub fn report_etb_problem(&mut self) {
        if self.allow_etb.is_allowed() {
            error!("Limp: throttle problem, disabling electronic throttle");
        }
        self.allow_etb.clear(ClearReason::EtbProblem);
        self.set_fault_rev_limit(ETB_PROBLEM_REV_LIMIT);
    }

    /// Unrecoverable: everything off until restart.
    pub fn fatal_error(&mut self) {
        if self.allow_injection.reason() != ClearReason::Fatal {
            error!("Limp: FATAL ERROR, all outputs disabled");
        }
        self.allow_etb.clear(ClearReason::Fatal);
        self.allow_ignition.clear(ClearReason::Fatal);
        self.allow_injection.clear(ClearReason::Fatal);
        self.allow_trigger_input.clear(ClearReason::Fatal);

        self.set_fault_rev_limit(0.0);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn allow_electronic_throttle(&self) -> bool {
        self.allow_etb.is_allowed()
    }

    pub fn allow_trigger_input(&self) -> bool {
        self.allow_trigger_input.is_allowed()
    }

    pub fn etb_state(&self) -> LimpState {
        resolve(&self.allow_etb, None)
    }

    pub fn trigger_input_state(&self) -> LimpState {
        resolve(&self.allow_trigger_input, None)
    }

    pub fn allow_injection(&self) -> LimpState {
        resolve(&self.allow_injection, Some(&self.transient_allow_injection))
    }

    pub fn allow_ignition(&self) -> LimpState {
        resolve(&self.allow_ignition, Some(&self.transient_allow_ignition))
    }

    /// Soft-limit timing retard (degrees); 0 unless spark cut is configured.
    pub fn limiting_timing_retard(&self) -> f32 {
        if !self.config.cut_spark_on_hard_limit {
            return 0.0;
        }
        self.timing_retard
    }

    /// Soft-limit fuel multiplier; 1 unless fuel cut is configured.
    pub fn limiting_fuel_correction(&self) -> f32 {
        if !self.config.cut_fuel_on_hard_limit {
            return 1.0;
        }
        self.fuel_correction
    }

    /// Seconds since fuel or spark was last cut for any reason.
    pub fn time_since_any_cut(&self, now: Micros) -> f32 {
        self.last_cut_timer.elapsed_secs(now)
    }

    pub fn fault_rev_limit(&self) -> f32 {
        self.fault_rev_limit
    }

    pub fn rev_limit(&self) -> f32 {
        self.rev_limit
    }

    pub fn resume_rpm(&self) -> f32 {
        self.resume_rpm
    }
}

fn resolve(persistent: &Clearable, transient: Option<&Clearable>) -> LimpState {
    if !persistent.is_allowed() {
        return LimpState::denied(persistent.reason());
    }
    match transient {
        Some(t) if !t.is_allowed() => LimpState::denied(t.reason()),
        _ => LimpState::ALLOWED,
    }
}

fn log_edge(name: &str, prev: LimpState, now: LimpState) {
    if prev.value && !now.value {
        warn!("LIMP CUT SET: {name} ({})", now.reason);
    } else if !prev.value && now.value {
        info!("LIMP CUT CLEARED: {name}");
    }
}
