//! Limp arbitration through the service: cut reasons, latching and the
//! edge events the tuning layer sees.

use throttlebody::app::commands::AppCommand;
use throttlebody::app::events::{AppEvent, Permission};
use throttlebody::config::{EngineConfig, LimpConfig};
use throttlebody::control::timer::Micros;
use throttlebody::engine::EngineState;
use throttlebody::limp::{ClearReason, LimpManager, LimpState};
use throttlebody::sensors::{SensorRegistry, SensorType};

use crate::mock_hw::{armed_service, healthy_sensors};

const MS: Micros = 1_000;

fn denied(sink_events: &[AppEvent], permission: Permission, reason: ClearReason) -> usize {
    sink_events
        .iter()
        .filter(|e| **e == AppEvent::PermissionDenied { permission, reason })
        .count()
}

// ── Rev limit ─────────────────────────────────────────────────

#[test]
fn rev_limit_cuts_until_resume_rpm() {
    let mut sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::running();

    sensors.set(SensorType::Rpm, 7100.0);
    ecu.fast_tick(&sensors, &engine, 5 * MS, &mut sink);
    assert_eq!(ecu.limp().allow_injection(), LimpState::denied(ClearReason::HardLimit));
    assert_eq!(ecu.limp().allow_ignition(), LimpState::denied(ClearReason::HardLimit));

    // inside the 50 rpm band: still cut
    sensors.set(SensorType::Rpm, 6980.0);
    ecu.fast_tick(&sensors, &engine, 10 * MS, &mut sink);
    assert!(!ecu.limp().allow_injection().value);

    sensors.set(SensorType::Rpm, 6900.0);
    ecu.fast_tick(&sensors, &engine, 15 * MS, &mut sink);
    assert_eq!(ecu.limp().allow_injection(), LimpState::ALLOWED);

    assert_eq!(denied(&sink.events, Permission::Injection, ClearReason::HardLimit), 1);
    assert_eq!(
        sink.count(|e| *e == AppEvent::PermissionRestored(Permission::Injection)),
        1
    );
    // the throttle is never part of a rev cut
    assert!(ecu.limp().allow_electronic_throttle());
}

#[test]
fn spark_only_rev_limit_keeps_fuel() {
    let mut sensors = healthy_sensors();
    let mut config = EngineConfig::default();
    config.limp.cut_fuel_on_hard_limit = false;
    let (mut ecu, mut sink) = armed_service(config, &sensors);

    sensors.set(SensorType::Rpm, 7500.0);
    ecu.fast_tick(&sensors, &EngineState::running(), 5 * MS, &mut sink);

    assert!(ecu.limp().allow_injection().value);
    assert_eq!(ecu.limp().allow_ignition().reason, ClearReason::HardLimit);
    assert_eq!(ecu.limp().limiting_fuel_correction(), 1.0);
}

// ── Engine stop and ignition ──────────────────────────────────

#[test]
fn stop_request_cuts_fuel_for_the_stop_window() {
    let mut sensors = healthy_sensors();
    sensors.set(SensorType::Rpm, 800.0);
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::running();

    ecu.handle_command(AppCommand::StopEngine, &sensors, 100 * MS, &mut sink)
        .unwrap();
    assert!(ecu.is_engine_stop(200 * MS));

    ecu.fast_tick(&sensors, &engine, 200 * MS, &mut sink);
    assert_eq!(ecu.limp().allow_injection().reason, ClearReason::StopRequested);
    // spark stays so the charge burns off
    assert!(ecu.limp().allow_ignition().value);

    // default window is 5 s
    ecu.fast_tick(&sensors, &engine, 5_200 * MS, &mut sink);
    assert!(!ecu.is_engine_stop(5_200 * MS));
    assert!(ecu.limp().allow_injection().value);
}

#[test]
fn ignition_off_cuts_fuel_and_spark() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::default();

    ecu.fast_tick(&sensors, &engine, 5 * MS, &mut sink);
    assert!(ecu.limp().allow_injection().value);

    ecu.handle_command(AppCommand::SetIgnition(false), &sensors, 10 * MS, &mut sink)
        .unwrap();
    ecu.fast_tick(&sensors, &engine, 10 * MS, &mut sink);

    let live = ecu.limp_live_data(10 * MS);
    assert_eq!(live.injection, LimpState::denied(ClearReason::IgnitionOff));
    assert_eq!(live.ignition, LimpState::denied(ClearReason::IgnitionOff));
    assert_eq!(live.etb, LimpState::ALLOWED);
    assert_eq!(denied(&sink.events, Permission::Ignition, ClearReason::IgnitionOff), 1);
}

#[test]
fn self_stimulation_overrides_ignition_off() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    ecu.handle_command(AppCommand::SetIgnition(false), &sensors, 0, &mut sink)
        .unwrap();

    let engine = EngineState {
        self_stimulation: true,
        ..EngineState::default()
    };
    ecu.fast_tick(&sensors, &engine, 5 * MS, &mut sink);
    assert!(ecu.limp().allow_injection().value);
}

// ── Boost cut ─────────────────────────────────────────────────

#[test]
fn boost_cut_releases_below_hysteresis() {
    let mut sensors = healthy_sensors();
    let mut config = EngineConfig::default();
    config.limp.boost_cut_pressure = 200.0;
    config.limp.boost_cut_pressure_hyst = 20.0;
    let (mut ecu, mut sink) = armed_service(config, &sensors);
    let engine = EngineState::running();

    sensors.set(SensorType::Map, 210.0);
    ecu.fast_tick(&sensors, &engine, 5 * MS, &mut sink);
    assert_eq!(ecu.limp().allow_injection().reason, ClearReason::BoostCut);
    assert!(ecu.limp().allow_ignition().value);

    sensors.set(SensorType::Map, 185.0);
    ecu.fast_tick(&sensors, &engine, 10 * MS, &mut sink);
    assert_eq!(ecu.limp().allow_injection().reason, ClearReason::BoostCut);

    sensors.set(SensorType::Map, 175.0);
    ecu.fast_tick(&sensors, &engine, 15 * MS, &mut sink);
    assert!(ecu.limp().allow_injection().value);
}

// ── Fault ceiling and fatal ───────────────────────────────────

#[test]
fn fault_rev_limit_only_ratchets_down() {
    let mut limp = LimpManager::new(LimpConfig::default());
    limp.on_ignition_state_changed(true);
    assert_eq!(limp.fault_rev_limit(), f32::INFINITY);

    limp.set_fault_rev_limit(3000.0);
    limp.set_fault_rev_limit(5000.0);
    assert_eq!(limp.fault_rev_limit(), 3000.0);

    let mut sensors = SensorRegistry::new();
    sensors.set(SensorType::Rpm, 3100.0);
    limp.update_state(3100.0, 0, &sensors, &EngineState::running(), false);
    assert_eq!(limp.allow_injection().reason, ClearReason::FaultRevLimit);
    // spark is left alone
    assert!(limp.allow_ignition().value);

    limp.update_state(2900.0, 5 * MS, &sensors, &EngineState::running(), false);
    assert!(limp.allow_injection().value);
}

#[test]
fn fatal_error_is_permanent() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::running();

    ecu.handle_command(AppCommand::FatalError, &sensors, 0, &mut sink)
        .unwrap();

    let mut now = 0;
    for _ in 0..100 {
        now += 5 * MS;
        ecu.handle_command(AppCommand::SetIgnition(true), &sensors, now, &mut sink)
            .unwrap();
        ecu.fast_tick(&sensors, &engine, now, &mut sink);
    }

    let live = ecu.limp_live_data(now);
    for state in [live.injection, live.ignition, live.etb, live.trigger_input] {
        assert_eq!(state, LimpState::denied(ClearReason::Fatal));
    }
    assert_eq!(live.fault_rev_limit, 0.0);
    assert_eq!(sink.count(|e| *e == AppEvent::Fatal), 1);
    assert_eq!(sink.count(|e| matches!(e, AppEvent::PermissionRestored(_))), 0);
}

#[test]
fn config_disable_reads_as_settings() {
    let sensors = healthy_sensors();
    let mut config = EngineConfig::default();
    config.limp.is_injection_enabled = false;
    let (mut ecu, mut sink) = armed_service(config, &sensors);

    ecu.fast_tick(&sensors, &EngineState::default(), 5 * MS, &mut sink);
    assert_eq!(ecu.limp().allow_injection(), LimpState::denied(ClearReason::Settings));
    assert!(ecu.limp().allow_ignition().value);
}
