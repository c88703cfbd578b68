//! Application service: the hexagonal core.
//!
//! [`EcuService`] owns the throttle controllers, the limp manager, the
//! shutdown sequencer and the live calibration.  It exposes the periodic
//! entry points the scheduler drives and a command interface for the
//! tuning/console layer.  All I/O flows through port traits injected at
//! call sites, so the whole service runs against mock adapters.
//!
//! ```text
//!  SensorPort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                 │          EcuService          │
//!   MotorPort ◀── │  ETB ×2 · Limp · Shutdown    │
//!                 └──────────────────────────────┘
//!   etb_tick (500 Hz)   fast_tick (200 Hz)   slow_tick (20 Hz)
//! ```

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{error, info, warn};

use crate::config::{ETB_COUNT, EngineConfig};
use crate::control::timer::Micros;
use crate::diagnostics::{EtbLiveData, FaultKind, FaultLog, LimpLiveData};
use crate::engine::EngineState;
use crate::error::{EtbInitError, Error, Result};
use crate::limp::{LimpManager, LimpState};
use crate::sensors::SensorType;
use crate::start_stop::{ShutdownController, StartStopButton};
use crate::throttle::autocal::AutocalOverlay;
use crate::throttle::{EtbContext, EtbStatus, SharedProvider, ThrottleController, percent_to_duty};

use super::commands::AppCommand;
use super::events::{AppEvent, Permission};
use super::ports::{ConfigPort, EventSink, MotorPort, SensorPort};

/// Seconds after the last change before the config is persisted.
const CONFIG_AUTOSAVE_DELAY_SECS: f32 = 5.0;

const PERMISSIONS: [Permission; 4] = [
    Permission::Injection,
    Permission::Ignition,
    Permission::Etb,
    Permission::TriggerInput,
];

// ───────────────────────────────────────────────────────────────
// EcuService
// ───────────────────────────────────────────────────────────────

/// The control core: everything that runs on the periodic ticks.
pub struct EcuService<M: MotorPort> {
    config: EngineConfig,
    pedal_provider: SharedProvider,
    trim_provider: SharedProvider,
    etbs: [ThrottleController<M>; ETB_COUNT],
    limp: LimpManager,
    shutdown: ShutdownController,
    /// Manual override, already mapped to duty.
    direct_duty: Option<f32>,
    etb_configured: [bool; ETB_COUNT],
    /// Last reported answer per permission, for edge detection.
    permissions: [LimpState; 4],
    faults: FaultLog,
    config_dirty: Option<Micros>,
}

impl<M: MotorPort> EcuService<M> {
    /// Construct the service with unarmed controllers.
    ///
    /// Does **not** arm anything; call [`init`](Self::init) next.
    pub fn new(config: EngineConfig, motors: [M; ETB_COUNT]) -> Self {
        let [m1, m2] = motors;
        let limp = LimpManager::new(config.limp.clone());
        Self {
            pedal_provider: Arc::new(config.tables.pedal_to_tps.clone()),
            trim_provider: Arc::new(config.tables.throttle2_trim.clone()),
            etbs: [ThrottleController::new(0, m1), ThrottleController::new(1, m2)],
            limp,
            shutdown: ShutdownController::new(),
            direct_duty: None,
            etb_configured: [false; ETB_COUNT],
            permissions: [LimpState::ALLOWED; 4],
            faults: FaultLog::new(),
            config_dirty: None,
            config,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm every channel for its configured function.  Individual channel
    /// failures leave that channel unarmed and are reported; a pedal with
    /// no armed throttle is an error, carrying the first channel failure
    /// when there was one.
    pub fn init(&mut self, sensors: &impl SensorPort, now: Micros, sink: &mut impl EventSink) -> Result<()> {
        let has_pedal = sensors.has_sensor(SensorType::AcceleratorPedalPrimary);
        let mut any_etb = false;
        let mut first_failure: Option<EtbInitError> = None;

        for (i, etb) in self.etbs.iter_mut().enumerate() {
            let function = self.config.etb.functions[i];
            let pid = self.config.pid_for_function(function);

            // Only the second throttle carries a trim
            if i == 1 {
                etb.set_trim_provider(Some(self.trim_provider.clone()));
            }

            let result = etb.init(function, pid, Some(self.pedal_provider.clone()), has_pedal, sensors);
            let ok = match result {
                Ok(()) => {
                    info!("ETB{}: armed as {:?}", i + 1, function);
                    true
                }
                Err(EtbInitError::NoFunction) => false,
                Err(e) => {
                    warn!("ETB{}: not armed: {e}", i + 1);
                    first_failure.get_or_insert(e);
                    sink.emit(&AppEvent::EtbInitFailed {
                        index: i,
                        reason: e.status(),
                    });
                    self.faults.record(
                        now,
                        FaultKind::EtbInit {
                            index: i,
                            status: e.status(),
                        },
                    );
                    false
                }
            };

            self.etb_configured[i] = ok && function.is_etb();
            any_etb |= self.etb_configured[i];
        }

        info!(
            "ETB init: etb1={} etb2={}",
            self.etb_configured[0], self.etb_configured[1]
        );

        if !any_etb && has_pedal {
            error!("A pedal position sensor was configured, but no electronic throttles are configured");
            return Err(first_failure.map_or(
                Error::Config("pedal configured without an electronic throttle"),
                Error::Init,
            ));
        }
        Ok(())
    }

    /// Apply new calibration.  PID changes force a controller reset; every
    /// channel is then re-armed against the new functions.
    pub fn on_configuration_change(
        &mut self,
        config: EngineConfig,
        sensors: &impl SensorPort,
        now: Micros,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        config.validate()?;

        for etb in &mut self.etbs {
            let pid = config.pid_for_function(etb.function());
            etb.on_configuration_change(pid, &config.etb);
        }
        self.pedal_provider = Arc::new(config.tables.pedal_to_tps.clone());
        self.trim_provider = Arc::new(config.tables.throttle2_trim.clone());
        self.limp.on_configuration_change(&config.limp);
        self.config = config;

        info!("Configuration reloaded");
        self.init(sensors, now, sink)
    }

    // ── Periodic entry points ─────────────────────────────────

    /// Limp manager evaluation.  Call at `FAST_CALLBACK_FREQUENCY`.
    pub fn fast_tick(
        &mut self,
        sensors: &impl SensorPort,
        engine: &EngineState,
        now: Micros,
        sink: &mut impl EventSink,
    ) {
        let rpm = sensors.get_or_zero(SensorType::Rpm);
        let stop_requested = self
            .shutdown
            .is_engine_stop(now, self.config.limp.engine_stop_duration_secs);
        self.limp.update_state(rpm, now, sensors, engine, stop_requested);
        self.report_permission_edges(now, sink);
    }

    /// One throttle control cycle for every channel.  Call at
    /// `ETB_LOOP_FREQUENCY`.  A pending auto-calibration blocks on `delay`.
    pub fn etb_tick(
        &mut self,
        sensors: &impl SensorPort,
        engine: &EngineState,
        now: Micros,
        delay: &mut impl DelayNs,
        sink: &mut impl EventSink,
    ) {
        let allow_etb = self.limp.allow_electronic_throttle();
        let ctx = EtbContext {
            sensors,
            config: &self.config.etb,
            tables: &self.config.tables,
            engine,
            allow_etb,
            direct_duty: self.direct_duty,
            now,
        };

        let mut etb_problem = false;
        for etb in &mut self.etbs {
            let before = etb.status();
            AutocalOverlay::new(etb).update(&ctx, delay, sink);

            let after = etb.status();
            if after != before && after != EtbStatus::None {
                self.faults.record(
                    now,
                    FaultKind::EtbStatus {
                        index: etb.index(),
                        status: after,
                    },
                );
            }
            etb_problem |= etb.has_integral_error_fault();
        }

        if etb_problem && self.config.etb.integral_error_is_fault {
            self.limp.report_etb_problem();
            self.report_permission_edges(now, sink);
        }
    }

    /// Housekeeping: start/stop button and config auto-save.  Call at
    /// `SLOW_CALLBACK_FREQUENCY`.
    pub fn slow_tick<B: InputPin, R: OutputPin>(
        &mut self,
        button: &mut StartStopButton<B, R>,
        rpm: f32,
        engine: &EngineState,
        now: Micros,
        storage: &mut impl ConfigPort,
    ) {
        if let Err(e) = button.tick(now, rpm, engine, &mut self.shutdown) {
            warn!("Start/stop button: {e}");
        }
        self.auto_save_if_needed(storage, now);
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        sensors: &impl SensorPort,
        now: Micros,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        match cmd {
            AppCommand::SetIdlePosition(pos) => {
                let pos = finite_or_zero(pos, "idle position");
                for etb in &mut self.etbs {
                    etb.set_idle_position(pos);
                }
            }
            AppCommand::SetWastegatePosition(pos) => {
                let pos = finite_or_zero(pos, "wastegate position");
                for etb in &mut self.etbs {
                    etb.set_wastegate_position(pos);
                }
            }
            AppCommand::SetLuaAdjustment(adj) => {
                let adj = finite_or_zero(adj, "script adjustment");
                for etb in &mut self.etbs {
                    etb.set_lua_adjustment(adj, now);
                }
            }
            AppCommand::RequestAutocal(index) => {
                let etb = self
                    .etbs
                    .get_mut(index)
                    .ok_or(Error::Config("no such throttle channel"))?;
                if etb.request_autocal() {
                    info!("ETB{}: autocal requested", index + 1);
                } else {
                    warn!("ETB{}: autocal refused, not a throttle", index + 1);
                }
            }
            AppCommand::SetDirectDuty(percent) => {
                if percent.is_nan() {
                    self.clear_direct_duty();
                } else {
                    let duty = percent_to_duty(percent);
                    info!("Direct duty override {:.1}%", duty * 100.0);
                    self.direct_duty = Some(duty);
                }
            }
            AppCommand::ClearDirectDuty => self.clear_direct_duty(),
            AppCommand::ResetPid => {
                for etb in &mut self.etbs {
                    etb.reset();
                }
                info!("ETB PID reset");
            }
            AppCommand::UpdateConfig(new_config) => {
                self.on_configuration_change(*new_config, sensors, now, sink)?;
                self.mark_config_dirty(now);
            }
            AppCommand::SaveConfig => {
                // Backdate so the next check flushes
                self.config_dirty = Some(0);
                info!("Explicit config save requested (will flush on next auto-save check)");
            }
            AppCommand::SetIgnition(on) => self.limp.on_ignition_state_changed(on),
            AppCommand::GdiCommsReceived => self.limp.on_gdi_comms(now),
            AppCommand::StopEngine => self.shutdown.schedule_stop_engine(now),
            AppCommand::FatalError => {
                self.limp.fatal_error();
                sink.emit(&AppEvent::Fatal);
                self.faults.record(now, FaultKind::Fatal);
                self.report_permission_edges(now, sink);
            }
            AppCommand::ClearFaultLog => self.faults.clear(),
        }
        Ok(())
    }

    fn clear_direct_duty(&mut self) {
        if self.direct_duty.take().is_some() {
            info!("Direct duty override cleared");
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Live data for one channel.
    pub fn live_data(&self, index: usize) -> Option<EtbLiveData> {
        self.etbs.get(index).map(ThrottleController::live_data)
    }

    pub fn limp_live_data(&self, now: Micros) -> LimpLiveData {
        LimpLiveData {
            injection: self.limp.allow_injection(),
            ignition: self.limp.allow_ignition(),
            etb: self.limp.etb_state(),
            trigger_input: self.limp.trigger_input_state(),
            rev_limit: self.limp.rev_limit(),
            resume_rpm: self.limp.resume_rpm(),
            fault_rev_limit: self.limp.fault_rev_limit(),
            timing_retard: self.limp.limiting_timing_retard(),
            fuel_correction: self.limp.limiting_fuel_correction(),
            time_since_any_cut: self.limp.time_since_any_cut(now),
        }
    }

    pub fn etb(&self, index: usize) -> Option<&ThrottleController<M>> {
        self.etbs.get(index)
    }

    pub fn limp(&self) -> &LimpManager {
        &self.limp
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    pub fn is_etb_configured(&self, index: usize) -> bool {
        self.etb_configured.get(index).copied().unwrap_or(false)
    }

    pub fn direct_duty(&self) -> Option<f32> {
        self.direct_duty
    }

    pub fn is_engine_stop(&self, now: Micros) -> bool {
        self.shutdown
            .is_engine_stop(now, self.config.limp.engine_stop_duration_secs)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Internal ──────────────────────────────────────────────

    fn permission_state(&self, permission: Permission) -> LimpState {
        match permission {
            Permission::Injection => self.limp.allow_injection(),
            Permission::Ignition => self.limp.allow_ignition(),
            Permission::Etb => self.limp.etb_state(),
            Permission::TriggerInput => self.limp.trigger_input_state(),
        }
    }

    /// Emit an event and record history only when an answer changes.
    fn report_permission_edges(&mut self, now: Micros, sink: &mut impl EventSink) {
        for (i, permission) in PERMISSIONS.into_iter().enumerate() {
            let state = self.permission_state(permission);
            let prev = self.permissions[i];
            if state == prev {
                continue;
            }
            self.permissions[i] = state;

            if state.value {
                sink.emit(&AppEvent::PermissionRestored(permission));
            } else {
                sink.emit(&AppEvent::PermissionDenied {
                    permission,
                    reason: state.reason,
                });
                self.faults.record(
                    now,
                    FaultKind::PermissionDenied {
                        permission,
                        reason: state.reason,
                    },
                );
            }
        }
    }

    // ── Config dirty-flag management ──────────────────────────

    pub fn mark_config_dirty(&mut self, now: Micros) {
        if self.config_dirty.is_none() {
            self.config_dirty = Some(now);
        }
    }

    /// Persist once the config has been stable for a few seconds.
    /// Returns `true` if the config was saved.
    pub fn auto_save_if_needed(&mut self, storage: &mut impl ConfigPort, now: Micros) -> bool {
        let Some(since) = self.config_dirty else {
            return false;
        };
        let secs = now.saturating_sub(since) as f32 / crate::control::timer::MICROS_PER_SECOND;
        if secs < CONFIG_AUTOSAVE_DELAY_SECS {
            return false;
        }
        self.force_save_if_dirty(storage)
    }

    /// Save now if dirty (call before power-down).
    pub fn force_save_if_dirty(&mut self, storage: &mut impl ConfigPort) -> bool {
        if self.config_dirty.is_none() {
            return false;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = None;
                info!("Config saved");
                true
            }
            Err(e) => {
                warn!("Config save failed: {e}");
                false
            }
        }
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty.is_some()
    }
}

/// Non-finite override values read as zero.
fn finite_or_zero(value: f32, what: &str) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!("Ignoring non-finite {what}: {value}");
        0.0
    }
}
