//! Engine configuration parameters
//!
//! All tunable parameters for the throttle controllers and the limp manager.
//! Values are loaded through a [`ConfigPort`](crate::app::ports::ConfigPort)
//! and re-applied on every calibration change.

use serde::{Deserialize, Serialize};

use crate::control::pid::PidParams;
use crate::control::table::{Table2d, Table3d};
use crate::error::{Error, Result};
use crate::limp::OperationMode;
use crate::throttle::ThrottleFunction;

/// Number of H-bridge throttle/actuator channels.
pub const ETB_COUNT: usize = 2;

/// Rate of the throttle control loop.
pub const ETB_LOOP_FREQUENCY: u32 = 500;

/// Rate of the fast engine callback that drives the limp manager.
pub const FAST_CALLBACK_FREQUENCY: u32 = 200;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub etb: EtbConfig,
    pub tables: EtbTables,
    pub limp: LimpConfig,
    pub start_stop: StartStopConfig,
}

/// Throttle controller parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtbConfig {
    /// Function of each H-bridge channel.
    pub functions: [ThrottleFunction; ETB_COUNT],
    /// PID gains for throttle and idle-valve functions.
    pub pid: PidParams,
    /// PID gains for the wastegate function.
    pub wastegate_pid: PidParams,
    pub i_term_min: f32,
    pub i_term_max: f32,

    /// Idle position (0-100%) maps onto this much throttle opening (%).
    pub idle_throttle_range: f32,
    /// Lowest target the throttle is ever commanded to (%).
    pub minimum_position: f32,
    /// Highest target the throttle is ever commanded to (%, capped at 100).
    pub maximum_position: f32,

    /// RPM at which the throttle starts closing (0 = disabled).
    pub rev_limit_start: f32,
    /// RPM span over which the throttle tapers fully closed.
    pub rev_limit_range: f32,

    /// Averaging length for |duty|.
    pub exp_average_length: u16,
    /// Averaging length for |Δduty|.
    pub roc_exp_average_length: u16,

    /// Manual pause: throttle motors stay disabled.
    pub pause_control: bool,
    /// Disable throttle drive when the engine hasn't moved recently.
    pub disable_when_engine_stopped: bool,

    /// |integrator| above which a jam is suspected (0 = disabled).
    pub jam_integrator_limit: f32,
    /// How long the integrator must stay above the limit (seconds).
    pub jam_timeout_secs: f32,

    /// Escalate >10 %·s of accumulated position error to the limp manager.
    /// When false the integral is reported only.
    pub integral_error_is_fault: bool,

    /// Which throttle instance may run relay autotune.
    pub autotune_function: ThrottleFunction,

    /// Extra opening while antilag is active (%).
    pub als_etb_add: f32,
}

impl Default for EtbConfig {
    fn default() -> Self {
        Self {
            functions: [ThrottleFunction::Throttle1, ThrottleFunction::Throttle2],
            pid: PidParams::default(),
            wastegate_pid: PidParams::default(),
            i_term_min: -30.0,
            i_term_max: 30.0,

            idle_throttle_range: 15.0,
            minimum_position: 0.0,
            maximum_position: 100.0,

            rev_limit_start: 0.0,
            rev_limit_range: 250.0,

            exp_average_length: 50,
            roc_exp_average_length: 50,

            pause_control: false,
            disable_when_engine_stopped: false,

            jam_integrator_limit: 0.0,
            jam_timeout_secs: 1.0,

            integral_error_is_fault: false,
            autotune_function: ThrottleFunction::Throttle1,

            als_etb_add: 0.0,
        }
    }
}

/// Calibration tables consumed by the throttle setpoint path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtbTables {
    /// (RPM, pedal %) → throttle target %.
    pub pedal_to_tps: Table3d,
    /// (RPM, target %) → per-throttle trim for throttle #2.
    pub throttle2_trim: Table3d,
    /// (wheel slip, vehicle speed) → traction-control drop %.
    pub traction_etb_drop: Table3d,
    /// Target % → feed-forward duty %.
    pub bias: Table2d,
}

const PEDAL_BINS: [f32; 8] = [0.0, 14.0, 29.0, 43.0, 57.0, 71.0, 86.0, 100.0];
const RPM_BINS: [f32; 8] = [0.0, 1000.0, 2000.0, 3000.0, 4000.0, 5000.0, 6000.0, 7000.0];

impl Default for EtbTables {
    fn default() -> Self {
        // Linear pedal map: every RPM row maps pedal % straight to target %.
        let pedal_rows = PEDAL_BINS.iter().map(|&p| vec![p; RPM_BINS.len()]).collect();

        Self {
            pedal_to_tps: Table3d::new(&RPM_BINS, &PEDAL_BINS, pedal_rows),
            throttle2_trim: Table3d::filled(&RPM_BINS, &PEDAL_BINS, 0.0),
            traction_etb_drop: Table3d::filled(
                &[0.9, 0.95, 1.0, 1.05, 1.1, 1.2],
                &[10.0, 20.0, 40.0, 60.0, 80.0, 120.0],
                0.0,
            ),
            bias: Table2d::new(
                &[0.0, 1.0, 2.0, 4.0, 7.0, 98.0, 99.0, 100.0],
                &[-20.0, -18.0, -17.0, 0.0, 20.0, 21.0, 22.0, 25.0],
            ),
        }
    }
}

/// Limp manager parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimpConfig {
    pub is_injection_enabled: bool,
    pub is_ignition_enabled: bool,

    // --- Rev limit ---
    pub rpm_hard_limit: f32,
    pub use_clt_based_rpm_limit: bool,
    /// CLT (°C) → RPM limit.
    pub clt_rev_limit: Table2d,
    /// RPM drop required before fuel/spark resume.
    pub rpm_hard_limit_hyst: f32,
    /// Timing retard ramped in from resume RPM up to the limit (degrees).
    pub rpm_soft_limit_timing_retard: f32,
    /// Fuel added ramped in from resume RPM up to the limit (%).
    pub rpm_soft_limit_fuel_added: f32,
    pub cut_fuel_on_hard_limit: bool,
    pub cut_spark_on_hard_limit: bool,

    // --- Boost ---
    /// MAP (kPa) above which fuel is cut (0 = disabled).
    pub boost_cut_pressure: f32,
    /// MAP drop (kPa) required before fuel resumes.
    pub boost_cut_pressure_hyst: f32,

    // --- Oil pressure ---
    /// Pressure (kPa) that must be seen within 5 s of start (0 = disabled).
    pub min_oil_pressure_after_start: f32,
    pub enable_oil_pressure_protect: bool,
    /// RPM → minimum running oil pressure (kPa).
    pub minimum_oil_pressure: Table2d,
    pub minimum_oil_pressure_timeout_secs: f32,

    // --- Injector duty ---
    pub max_injector_duty_instant: f32,
    pub max_injector_duty_sustained: f32,
    pub max_injector_duty_sustained_timeout_secs: f32,

    // --- Misc cuts ---
    /// Cut fuel while cranking with the pedal floored.
    pub is_cylinder_cleanup_enabled: bool,
    pub cut_fuel_in_acr: bool,
    pub is_phase_sync_required_for_ignition: bool,
    pub operation_mode: OperationMode,
    pub vvt_map_v_twin: bool,
    pub is_gdi_engine: bool,
    pub external_gdi_module: bool,

    /// How long an engine-stop request keeps fuel cut (seconds).
    pub engine_stop_duration_secs: f32,
}

impl Default for LimpConfig {
    fn default() -> Self {
        Self {
            is_injection_enabled: true,
            is_ignition_enabled: true,

            rpm_hard_limit: 7000.0,
            use_clt_based_rpm_limit: false,
            clt_rev_limit: Table2d::new(&[-20.0, 20.0, 60.0, 90.0], &[3500.0, 4500.0, 6500.0, 7000.0]),
            rpm_hard_limit_hyst: 50.0,
            rpm_soft_limit_timing_retard: 0.0,
            rpm_soft_limit_fuel_added: 0.0,
            cut_fuel_on_hard_limit: true,
            cut_spark_on_hard_limit: true,

            boost_cut_pressure: 0.0,
            boost_cut_pressure_hyst: 20.0,

            min_oil_pressure_after_start: 0.0,
            enable_oil_pressure_protect: false,
            minimum_oil_pressure: Table2d::new(&[0.0, 2000.0, 4000.0, 7000.0], &[50.0, 100.0, 200.0, 250.0]),
            minimum_oil_pressure_timeout_secs: 0.5,

            max_injector_duty_instant: 96.0,
            max_injector_duty_sustained: 90.0,
            max_injector_duty_sustained_timeout_secs: 1.0,

            is_cylinder_cleanup_enabled: true,
            cut_fuel_in_acr: false,
            is_phase_sync_required_for_ignition: false,
            operation_mode: OperationMode::FourStrokeCrankSensor,
            vvt_map_v_twin: false,
            is_gdi_engine: false,
            external_gdi_module: false,

            engine_stop_duration_secs: 5.0,
        }
    }
}

/// Start/stop button parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartStopConfig {
    /// Maximum time the starter stays engaged (seconds).
    pub cranking_duration_secs: f32,
    /// Button debounce window (milliseconds).
    pub debounce_ms: u32,
}

impl Default for StartStopConfig {
    fn default() -> Self {
        Self {
            cranking_duration_secs: 6.0,
            debounce_ms: 50,
        }
    }
}

impl EngineConfig {
    /// PID parameters for a given channel function.
    pub fn pid_for_function(&self, function: ThrottleFunction) -> &PidParams {
        match function {
            ThrottleFunction::Wastegate => &self.etb.wastegate_pid,
            _ => &self.etb.pid,
        }
    }

    /// Reject values that would make the controllers unsafe.
    pub fn validate(&self) -> Result<()> {
        let etb = &self.etb;
        if etb.minimum_position > etb.maximum_position.min(100.0) {
            return Err(Error::Config("etb minimum position above maximum"));
        }
        if etb.rev_limit_range < 0.0 {
            return Err(Error::Config("etb rev limit range negative"));
        }
        if etb.i_term_min > etb.i_term_max {
            return Err(Error::Config("etb iTerm min above max"));
        }
        if etb.jam_timeout_secs < 0.0 {
            return Err(Error::Config("etb jam timeout negative"));
        }
        for pid in [&etb.pid, &etb.wastegate_pid] {
            if pid.min_value > pid.max_value {
                return Err(Error::Config("pid output min above max"));
            }
        }

        let t = &self.tables;
        if !t.pedal_to_tps.is_valid() || !t.throttle2_trim.is_valid() || !t.traction_etb_drop.is_valid() {
            return Err(Error::Config("malformed throttle table"));
        }
        if !t.bias.is_valid() {
            return Err(Error::Config("malformed bias curve"));
        }

        let limp = &self.limp;
        if limp.rpm_hard_limit_hyst < 0.0 || limp.rpm_hard_limit_hyst > limp.rpm_hard_limit {
            return Err(Error::Config("rev limit hysteresis out of range"));
        }
        if limp.boost_cut_pressure != 0.0
            && (limp.boost_cut_pressure_hyst < 0.0 || limp.boost_cut_pressure_hyst > limp.boost_cut_pressure)
        {
            return Err(Error::Config("boost cut hysteresis out of range"));
        }
        if limp.max_injector_duty_sustained_timeout_secs < 0.0 || limp.minimum_oil_pressure_timeout_secs < 0.0 {
            return Err(Error::Config("negative limp timeout"));
        }
        if limp.use_clt_based_rpm_limit && !limp.clt_rev_limit.is_valid() {
            return Err(Error::Config("malformed CLT rev limit curve"));
        }
        if self.start_stop.cranking_duration_secs <= 0.0 {
            return Err(Error::Config("cranking duration must be positive"));
        }
        Ok(())
    }

    /// Encode for persistence.
    pub fn to_bytes(&self) -> core::result::Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode a persisted blob.
    pub fn from_bytes(bytes: &[u8]) -> core::result::Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
