//! Closed-loop DC motor position control.
//!
//! One [`ThrottleController`] per H-bridge.  Depending on its
//! [`ThrottleFunction`] a controller is an electronic throttle (pedal
//! driven, redundant sensors mandatory), an idle valve or a wastegate
//! (position set externally, no redundancy requirement).
//!
//! ## Per-cycle flow
//!
//! ```text
//!   direct duty? ──yes──▶ motor.set(duty), status Manual
//!        │no
//!   check_status() ──fail──▶ motor.disable("etb status")
//!        │ok
//!   setpoint ─▶ observe ─▶ open loop + closed loop ─▶ set_output()
//!        │
//!   check_output(): duty averages, jam detection
//! ```
//!
//! [`set_output`](ThrottleController::set_output) is the only place where
//! limp permissions meet the motor.  It is re-evaluated every cycle.

pub mod autocal;
pub mod autotune;

use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::events::{AppEvent, CalibrationEvent};
use crate::app::ports::{EventSink, MotorPort, SensorPort};
use crate::config::{ETB_LOOP_FREQUENCY, EtbConfig, EtbTables};
use crate::control::average::{ErrorAccumulator, ExpAverage};
use crate::control::pid::{Pid, PidParams};
use crate::control::table::{ValueProvider3d, clamp_f, clamp_percent, interpolate_clamped};
use crate::control::timer::{Micros, Timer};
use crate::diagnostics::EtbLiveData;
use crate::engine::EngineState;
use crate::error::EtbInitError;
use crate::sensors::SensorType;

use self::autotune::RelayAutotune;

/// Shared pedal map or trim table.
pub type SharedProvider = Arc<dyn ValueProvider3d + Send + Sync>;

/// Largest duty magnitude ever commanded.
pub const ETB_DUTY_LIMIT: f32 = 0.9;

/// Distinct invalid-read episodes tolerated before a sensor is distrusted.
pub const ETB_INTERMITTENT_LIMIT: u16 = 50;

/// Script adjustments older than this are ignored.
const LUA_ADJUSTMENT_TIMEOUT_SECS: f32 = 0.2;

/// Position error (%) ignored by the integral error check.
const INTEGRAL_ERROR_DEADBAND: f32 = 3.0;

/// Accumulated position error (%·s) considered a loss of control.
pub const INTEGRAL_ERROR_LIMIT: f32 = 10.0;

/// Trim is clamped to this magnitude (%).
const TRIM_LIMIT: f32 = 10.0;

/// Changes smaller than this don't count as the rev limiter acting.
const REV_LIMIT_ACTIVE_THRESHOLD: f32 = 0.1;

/// Target pinned during relay autotune.
pub const AUTOTUNE_TARGET: f32 = 50.0;

/// Seconds per control cycle.
pub const ETB_PERIOD_SECS: f32 = 1.0 / ETB_LOOP_FREQUENCY as f32;

/// Map a percent output onto motor duty, limited to `±ETB_DUTY_LIMIT`.
pub fn percent_to_duty(percent: f32) -> f32 {
    clamp_f(-ETB_DUTY_LIMIT, 0.01 * percent, ETB_DUTY_LIMIT)
}

// ───────────────────────────────────────────────────────────────
// Function and status
// ───────────────────────────────────────────────────────────────

/// What an H-bridge channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottleFunction {
    None,
    Throttle1,
    Throttle2,
    IdleValve,
    Wastegate,
}

impl ThrottleFunction {
    /// True electronic throttles: pedal driven, limp gated.
    pub const fn is_etb(self) -> bool {
        matches!(self, Self::Throttle1 | Self::Throttle2)
    }

    /// Sensor observed by the closed loop.
    pub const fn position_sensor(self) -> Option<SensorType> {
        match self {
            Self::Throttle1 => Some(SensorType::Tps1),
            Self::Throttle2 => Some(SensorType::Tps2),
            Self::IdleValve => Some(SensorType::IdlePosition),
            Self::Wastegate => Some(SensorType::WastegatePosition),
            Self::None => None,
        }
    }

    pub const fn tps_sensor(self) -> SensorType {
        match self {
            Self::Throttle1 => SensorType::Tps1,
            _ => SensorType::Tps2,
        }
    }

    pub const fn tps_primary(self) -> SensorType {
        match self {
            Self::Throttle1 => SensorType::Tps1Primary,
            _ => SensorType::Tps2Primary,
        }
    }

    pub const fn tps_secondary(self) -> SensorType {
        match self {
            Self::Throttle1 => SensorType::Tps1Secondary,
            _ => SensorType::Tps2Secondary,
        }
    }
}

/// Controller status code reported through live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EtbStatus {
    #[default]
    None = 0,
    EngineStopped = 1,
    TpsError = 2,
    IntermittentTps = 4,
    IntermittentPps = 5,
    Redundancy = 7,
    Lua = 9,
    Manual = 10,
}

impl EtbStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl core::fmt::Display for EtbStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::None => "ok",
            Self::EngineStopped => "engine stopped",
            Self::TpsError => "TPS error",
            Self::IntermittentTps => "intermittent TPS",
            Self::IntermittentPps => "intermittent PPS",
            Self::Redundancy => "redundancy",
            Self::Lua => "script disable",
            Self::Manual => "manual duty",
        };
        f.write_str(s)
    }
}

// ───────────────────────────────────────────────────────────────
// Per-cycle inputs
// ───────────────────────────────────────────────────────────────

/// Everything a controller reads from the outside world in one cycle.
pub struct EtbContext<'a, S: SensorPort> {
    pub sensors: &'a S,
    pub config: &'a EtbConfig,
    pub tables: &'a EtbTables,
    pub engine: &'a EngineState,
    /// Limp manager permission, sampled this cycle.
    pub allow_etb: bool,
    /// Manual duty override (already mapped to duty).
    pub direct_duty: Option<f32>,
    pub now: Micros,
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct ThrottleController<M: MotorPort> {
    index: usize,
    motor: M,
    /// Set by a successful `init`; an unarmed controller never drives.
    armed: bool,
    function: ThrottleFunction,
    position_sensor: Option<SensorType>,

    pid: Pid,
    should_reset_pid: bool,

    pedal_provider: Option<SharedProvider>,
    /// Per-throttle trim, only fitted to throttle #2.
    trim_provider: Option<SharedProvider>,

    idle_position: f32,
    wastegate_position: f32,
    lua_adjustment: f32,
    lua_adjustment_timer: Timer,

    duty_average: ExpAverage,
    duty_roc_average: ExpAverage,
    prev_output: f32,
    error_accumulator: ErrorAccumulator,

    tps_error_counter: u16,
    pps_error_counter: u16,
    had_tps_error: bool,
    had_pps_error: bool,

    is_autotune: bool,
    autotune: RelayAutotune,
    autocal_requested: bool,

    jam_detect_timer: Timer,
    jam_detected: bool,
    jam_timer: f32,

    status: EtbStatus,

    // ── Live data ──
    current_target: f32,
    target_with_idle: f32,
    adjusted_target: f32,
    feed_forward: f32,
    trim: f32,
    tc_drop: f32,
    integral_error: f32,
    rev_limit_active: bool,
    last_output: Option<f32>,
}

impl<M: MotorPort> ThrottleController<M> {
    /// Construct an unarmed controller owning its motor.
    pub fn new(index: usize, motor: M) -> Self {
        let defaults = EtbConfig::default();
        Self {
            index,
            motor,
            armed: false,
            function: ThrottleFunction::None,
            position_sensor: None,
            pid: Pid::new(defaults.pid),
            should_reset_pid: true,
            pedal_provider: None,
            trim_provider: None,
            idle_position: 0.0,
            wastegate_position: 0.0,
            lua_adjustment: 0.0,
            lua_adjustment_timer: Timer::new(),
            duty_average: ExpAverage::new(defaults.exp_average_length),
            duty_roc_average: ExpAverage::new(defaults.roc_exp_average_length),
            prev_output: 0.0,
            error_accumulator: ErrorAccumulator::default(),
            tps_error_counter: 0,
            pps_error_counter: 0,
            had_tps_error: false,
            had_pps_error: false,
            is_autotune: false,
            autotune: RelayAutotune::new(),
            autocal_requested: false,
            jam_detect_timer: Timer::new(),
            jam_detected: false,
            jam_timer: 0.0,
            status: EtbStatus::None,
            current_target: 0.0,
            target_with_idle: 0.0,
            adjusted_target: 0.0,
            feed_forward: 0.0,
            trim: 0.0,
            tc_drop: 0.0,
            integral_error: 0.0,
            rev_limit_active: false,
            last_output: None,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm the controller for `function`.  Fails closed: on any unmet
    /// precondition the controller stays unarmed and the status code says
    /// why.
    pub fn init(
        &mut self,
        function: ThrottleFunction,
        pid: &PidParams,
        pedal_provider: Option<SharedProvider>,
        has_pedal: bool,
        sensors: &impl SensorPort,
    ) -> Result<(), EtbInitError> {
        if let Err(e) = Self::check_preconditions(function, has_pedal, sensors) {
            if self.armed {
                self.motor.disable("etb init");
            }
            self.armed = false;
            self.function = ThrottleFunction::None;
            self.position_sensor = None;
            self.status = e.status();
            if function.is_etb() && matches!(e, EtbInitError::TpsNotRedundant | EtbInitError::PedalNotRedundant) {
                error!("ETB{}: {e}", self.index + 1);
            }
            return Err(e);
        }

        self.function = function;
        self.position_sensor = function.position_sensor();
        self.pid.init_pid_class(pid);
        self.pedal_provider = pedal_provider;
        self.error_accumulator.init(INTEGRAL_ERROR_DEADBAND, ETB_PERIOD_SECS);
        self.armed = true;
        self.status = EtbStatus::None;

        self.reset();
        Ok(())
    }

    fn check_preconditions(
        function: ThrottleFunction,
        has_pedal: bool,
        sensors: &impl SensorPort,
    ) -> Result<(), EtbInitError> {
        if function == ThrottleFunction::None {
            return Err(EtbInitError::NoFunction);
        }
        if !function.is_etb() {
            return Ok(());
        }

        if !has_pedal {
            return Err(EtbInitError::NoPedal);
        }
        if !sensors.has_sensor(function.tps_sensor()) {
            return Err(EtbInitError::MissingTps);
        }
        if !sensors.is_redundant(function.tps_sensor()) {
            return Err(EtbInitError::TpsNotRedundant);
        }
        if !sensors.is_redundant(SensorType::AcceleratorPedal) {
            return Err(EtbInitError::PedalNotRedundant);
        }
        Ok(())
    }

    /// Zero transient state; the PID restarts on the next output.
    pub fn reset(&mut self) {
        self.should_reset_pid = true;
        self.duty_average.reset();
        self.duty_roc_average.reset();
        self.tps_error_counter = 0;
        self.pps_error_counter = 0;
    }

    /// Pick up new calibration.  A changed PID forces a reset so the
    /// integrator doesn't carry over into different gains.
    pub fn on_configuration_change(&mut self, new_pid: &PidParams, config: &EtbConfig) {
        if self.armed && !self.pid.is_same(new_pid) {
            self.should_reset_pid = true;
        }
        self.pid.init_pid_class(new_pid);
        self.duty_roc_average.init(config.roc_exp_average_length);
        self.duty_average.init(config.exp_average_length);
    }

    /// Fit the throttle #2 trim table.
    pub fn set_trim_provider(&mut self, provider: Option<SharedProvider>) {
        self.trim_provider = provider;
    }

    // ── External overrides ────────────────────────────────────

    pub fn set_idle_position(&mut self, pos: f32) {
        self.idle_position = pos;
    }

    pub fn set_wastegate_position(&mut self, pos: f32) {
        self.wastegate_position = pos;
    }

    /// Positive opens, negative closes.  Expires after 200 ms.
    pub fn set_lua_adjustment(&mut self, adjustment: f32, now: Micros) {
        self.lua_adjustment = adjustment;
        self.lua_adjustment_timer.reset(now);
    }

    pub fn lua_adjustment(&self, now: Micros) -> f32 {
        if self.lua_adjustment_timer.elapsed_secs(now) > LUA_ADJUSTMENT_TIMEOUT_SECS {
            0.0
        } else {
            self.lua_adjustment
        }
    }

    /// Ask for an open/close sweep.  Only throttles can be calibrated.
    pub fn request_autocal(&mut self) -> bool {
        if self.function.is_etb() {
            self.autocal_requested = true;
        }
        self.autocal_requested
    }

    // ── Setpoint ──────────────────────────────────────────────

    /// Target position (%) for this cycle, or `None` when there is none.
    pub fn setpoint<S: SensorPort>(&mut self, ctx: &EtbContext<'_, S>) -> Option<f32> {
        match self.function {
            ThrottleFunction::Throttle1 | ThrottleFunction::Throttle2 => self.setpoint_etb(ctx),
            ThrottleFunction::IdleValve => Some(clamp_percent(self.idle_position)),
            ThrottleFunction::Wastegate => Some(clamp_percent(self.wastegate_position)),
            ThrottleFunction::None => None,
        }
    }

    fn setpoint_etb<S: SensorPort>(&mut self, ctx: &EtbContext<'_, S>) -> Option<f32> {
        if self.is_autotune {
            return Some(AUTOTUNE_TARGET);
        }

        let provider = self.pedal_provider.as_ref()?;

        // A failed pedal reads as released: the throttle closes and the
        // engine can still idle.
        let pedal = clamp_percent(ctx.sensors.get(SensorType::AcceleratorPedal).unwrap_or(0.0));
        let rpm = ctx.sensors.get_or_zero(SensorType::Rpm);
        self.current_target = provider.value(rpm, pedal);

        // Compress [0, 100] into [idle, 100]
        let idle_addition = 0.01 * ctx.config.idle_throttle_range * clamp_percent(self.idle_position);
        self.target_with_idle = interpolate_clamped(0.0, idle_addition, 100.0, 100.0, self.current_target);

        let mut target = self.target_with_idle + self.lua_adjustment(ctx.now);

        if ctx.engine.antilag_active {
            target += ctx.config.als_etb_add;
        }

        let speed = ctx.sensors.get_or_zero(SensorType::VehicleSpeed);
        let slip = ctx.sensors.get_or_zero(SensorType::WheelSlipRatio);
        self.tc_drop = ctx.tables.traction_etb_drop.get_value(slip, speed);

        self.trim = clamp_f(-TRIM_LIMIT, self.throttle_trim(rpm, target), TRIM_LIMIT);
        target += self.trim + self.tc_drop;

        // Clamp before the rev limiter so an absurd target can't defeat it
        target = clamp_percent(target);

        let rev_limit_start = ctx.config.rev_limit_start;
        if rev_limit_start != 0.0 {
            let fully_limited = rev_limit_start + ctx.config.rev_limit_range;
            let before = target;
            target = interpolate_clamped(rev_limit_start, target, fully_limited, 0.0, rpm);
            self.rev_limit_active = (target - before).abs() > REV_LIMIT_ACTIVE_THRESHOLD;
        } else {
            self.rev_limit_active = false;
        }

        let max_position = ctx.config.maximum_position.min(100.0);
        target = clamp_f(ctx.config.minimum_position, target, max_position);
        self.adjusted_target = target;

        Some(target)
    }

    fn throttle_trim(&self, rpm: f32, target: f32) -> f32 {
        self.trim_provider.as_ref().map_or(0.0, |t| t.value(rpm, target))
    }

    // ── Loop terms ────────────────────────────────────────────

    /// Feed-forward duty (%) from the bias curve.  Idle valves and
    /// wastegates run closed loop only.
    pub fn open_loop(&mut self, target: f32, tables: &EtbTables) -> f32 {
        self.feed_forward = match self.function {
            ThrottleFunction::IdleValve | ThrottleFunction::Wastegate => 0.0,
            _ => tables.bias.interpolate(target),
        };
        self.feed_forward
    }

    /// Feedback duty (%): PID normally, relay during autotune.
    pub fn closed_loop(
        &mut self,
        target: f32,
        observation: f32,
        now: Micros,
        sink: &mut impl EventSink,
    ) -> f32 {
        if self.should_reset_pid {
            self.pid.reset();
            self.should_reset_pid = false;
        }

        if self.is_autotune {
            let (output, published) = self.autotune.output(target, observation, now);
            if let Some(event) = published {
                sink.emit(&AppEvent::Calibration(event));
            }
            return output;
        }

        self.integral_error = self.error_accumulator.accumulate(target - observation);

        self.pid.get_output(target, observation, ETB_PERIOD_SECS)
    }

    /// Whether accumulated position error says the plate isn't following.
    pub fn has_integral_error_fault(&self) -> bool {
        self.function.is_etb() && self.integral_error > INTEGRAL_ERROR_LIMIT
    }

    // ── Output ────────────────────────────────────────────────

    /// Drive or disable the motor.  Throttles additionally need limp
    /// permission, a valid output and no manual pause.
    pub fn set_output(&mut self, output: Option<f32>, allow_etb: bool, pause: bool) {
        self.last_output = output;

        if !self.armed {
            return;
        }

        let gated_ok = !self.function.is_etb() || (allow_etb && !pause);
        match output {
            Some(percent) if gated_ok => {
                self.motor.enable();
                self.motor.set(percent_to_duty(percent));
            }
            _ => self.motor.disable("no-ETB"),
        }
    }

    // ── Status ────────────────────────────────────────────────

    /// Classify sensor health and external disables.  `true` means the
    /// controller may drive this cycle.
    pub fn check_status<S: SensorPort>(&mut self, ctx: &EtbContext<'_, S>) -> bool {
        if !self.function.is_etb() {
            self.is_autotune = false;
            return true;
        }

        self.pid.i_term_min = ctx.config.i_term_min;
        self.pid.i_term_max = ctx.config.i_term_max;

        self.is_autotune = ctx.sensors.get_or_zero(SensorType::Rpm) == 0.0
            && ctx.engine.etb_autotune_requested
            && self.function == ctx.config.autotune_function;

        if !self.is_autotune && ctx.engine.sensors_should_work {
            // Count new fault episodes, not faulty cycles
            let is_tps_error = self
                .position_sensor
                .is_none_or(|s| ctx.sensors.get(s).is_err());
            if is_tps_error && !self.had_tps_error {
                self.tps_error_counter = self.tps_error_counter.saturating_add(1);
            }
            self.had_tps_error = is_tps_error;

            let is_pps_error = ctx.sensors.get(SensorType::AcceleratorPedal).is_err();
            if is_pps_error && !self.had_pps_error {
                self.pps_error_counter = self.pps_error_counter.saturating_add(1);
            }
            self.had_pps_error = is_pps_error;
        } else {
            self.tps_error_counter = 0;
            self.pps_error_counter = 0;
        }

        self.status = if self.tps_error_counter > ETB_INTERMITTENT_LIMIT {
            EtbStatus::IntermittentTps
        } else if ctx.config.disable_when_engine_stopped && !ctx.engine.engine_moved_recently {
            EtbStatus::EngineStopped
        } else if self.pps_error_counter > ETB_INTERMITTENT_LIMIT {
            EtbStatus::IntermittentPps
        } else if ctx.engine.lua_disable_etb {
            EtbStatus::Lua
        } else {
            EtbStatus::None
        };

        self.status == EtbStatus::None
    }

    // ── Per-cycle entry point ─────────────────────────────────

    /// Run one control cycle.  Returns the combined output (%) when the
    /// closed loop ran.
    pub fn update<S: SensorPort>(&mut self, ctx: &EtbContext<'_, S>, sink: &mut impl EventSink) -> Option<f32> {
        if !self.armed {
            return None;
        }

        let prev_status = self.status;
        let output = self.run_cycle(ctx, sink);

        if self.status != prev_status {
            self.report_status_change(prev_status, sink);
        }
        output
    }

    fn run_cycle<S: SensorPort>(&mut self, ctx: &EtbContext<'_, S>, sink: &mut impl EventSink) -> Option<f32> {
        if let Some(duty) = ctx.direct_duty {
            self.motor.enable();
            self.motor.set(duty);
            self.status = EtbStatus::Manual;
            return None;
        }

        if !self.check_status(ctx) {
            // Quieter and less power than holding the plate
            self.motor.disable("etb status");
            return None;
        }

        let output = self.closed_loop_update(ctx, sink)?;
        self.check_output(output, ctx);
        Some(output)
    }

    fn closed_loop_update<S: SensorPort>(
        &mut self,
        ctx: &EtbContext<'_, S>,
        sink: &mut impl EventSink,
    ) -> Option<f32> {
        let output = self.setpoint(ctx).and_then(|target| {
            let observation = ctx.sensors.get(self.position_sensor?).ok()?;
            let open = self.open_loop(target, ctx.tables);
            let closed = self.closed_loop(target, observation, ctx.now, sink);
            Some(open + closed)
        });

        self.set_output(output, ctx.allow_etb, ctx.config.pause_control);
        output
    }

    /// Duty statistics and integrator jam detection.
    fn check_output<S: SensorPort>(&mut self, output: f32, ctx: &EtbContext<'_, S>) {
        self.duty_average.average(output.abs());
        self.duty_roc_average.average((output - self.prev_output).abs());
        self.prev_output = output;

        let limit = ctx.config.jam_integrator_limit;
        if limit == 0.0 {
            return;
        }

        let integrator = self.pid.integration().abs();
        if integrator <= limit || !self.jam_detect_timer.is_started() {
            self.jam_detect_timer.reset(ctx.now);
            self.jam_detected = false;
        } else if self.jam_detect_timer.has_elapsed_secs(ctx.now, ctx.config.jam_timeout_secs) {
            if !self.jam_detected {
                warn!("ETB{}: jam detected, integrator {:.1}", self.index + 1, integrator);
            }
            self.jam_detected = true;
        }

        self.jam_timer = self.jam_detect_timer.elapsed_secs(ctx.now);
    }

    fn report_status_change(&self, from: EtbStatus, sink: &mut impl EventSink) {
        let to = self.status;
        if to == EtbStatus::None {
            info!("ETB{} STATUS CLEARED: was {from}", self.index + 1);
        } else {
            warn!("ETB{} STATUS SET: {to}", self.index + 1);
        }
        sink.emit(&AppEvent::EtbStatusChanged {
            index: self.index,
            from,
            to,
        });
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn function(&self) -> ThrottleFunction {
        self.function
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Armed as a true electronic throttle.
    pub fn is_etb_mode(&self) -> bool {
        self.armed && self.function.is_etb()
    }

    pub fn status(&self) -> EtbStatus {
        self.status
    }

    pub fn is_autotune(&self) -> bool {
        self.is_autotune
    }

    pub fn is_autocal_requested(&self) -> bool {
        self.autocal_requested
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Snapshot for the diagnostics layer.
    pub fn live_data(&self) -> EtbLiveData {
        EtbLiveData {
            function: self.function,
            armed: self.armed,
            status: self.status,
            status_code: self.status.code(),
            current_target: self.current_target,
            target_with_idle: self.target_with_idle,
            adjusted_target: self.adjusted_target,
            feed_forward: self.feed_forward,
            trim: self.trim,
            tc_drop: self.tc_drop,
            output: self.last_output,
            duty: self.motor.duty(),
            duty_average: self.duty_average.current(),
            duty_rate_of_change: self.duty_roc_average.current(),
            integral_error: self.integral_error,
            tps_error_counter: self.tps_error_counter,
            pps_error_counter: self.pps_error_counter,
            rev_limit_active: self.rev_limit_active,
            jam_detected: self.jam_detected,
            jam_timer: self.jam_timer,
            is_autotune: self.is_autotune,
            autotune_amplitude: self.autotune.amplitude(),
            autotune_period: self.autotune.period(),
        }
    }

    /// Emit one calibration event; used by the autocal sweep.
    fn publish(&self, sink: &mut impl EventSink, event: CalibrationEvent) {
        sink.emit(&AppEvent::Calibration(event));
    }
}
