//! Throttle control through the service: setpoint scenarios, sensor
//! fault escalation, limp gating, manual duty and auto-calibration.

use throttlebody::app::commands::AppCommand;
use throttlebody::app::events::{AppEvent, Permission};
use throttlebody::app::ports::MotorPort;
use throttlebody::app::service::EcuService;
use throttlebody::config::EngineConfig;
use throttlebody::control::timer::Micros;
use throttlebody::diagnostics::FaultKind;
use throttlebody::engine::EngineState;
use throttlebody::limp::ClearReason;
use throttlebody::sensors::{SensorRegistry, SensorType};
use throttlebody::throttle::{EtbStatus, ThrottleFunction};

use crate::mock_hw::{LogSink, MockMotor, MotorCall, NoDelay, armed_service, healthy_sensors};

/// One ETB period.
const CYCLE_US: Micros = 2_000;

fn run_cycles(
    ecu: &mut EcuService<MockMotor>,
    sensors: &SensorRegistry,
    engine: &EngineState,
    sink: &mut LogSink,
    from: Micros,
    cycles: u64,
) -> Micros {
    let mut delay = NoDelay::default();
    let mut now = from;
    for _ in 0..cycles {
        now += CYCLE_US;
        ecu.fast_tick(sensors, engine, now, sink);
        ecu.etb_tick(sensors, engine, now, &mut delay, sink);
    }
    now
}

// ── Setpoint ──────────────────────────────────────────────────

#[test]
fn half_pedal_at_standstill_follows_pedal_map() {
    let mut sensors = healthy_sensors();
    sensors.set(SensorType::AcceleratorPedal, 50.0);
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);

    run_cycles(&mut ecu, &sensors, &EngineState::default(), &mut sink, 0, 1);

    // default pedal map is linear
    let live = ecu.live_data(0).unwrap();
    assert!((live.current_target - 50.0).abs() < 1e-4);
    assert!((live.adjusted_target - 50.0).abs() < 1e-4);
    assert_eq!(live.status, EtbStatus::None);
    assert!(ecu.etb(0).unwrap().motor().is_enabled());
}

#[test]
fn lua_adjustment_expires() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    ecu.handle_command(AppCommand::SetLuaAdjustment(10.0), &sensors, 0, &mut sink)
        .unwrap();

    let engine = EngineState::default();
    let now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, 0, 50);
    assert!((ecu.live_data(0).unwrap().adjusted_target - 10.0).abs() < 1e-4);

    // 100 ms + 150 ms: past the 200 ms freshness window
    run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 75);
    assert_eq!(ecu.live_data(0).unwrap().adjusted_target, 0.0);
}

#[test]
fn non_finite_overrides_keep_duty_finite() {
    let mut sensors = healthy_sensors();
    sensors.set(SensorType::AcceleratorPedal, 30.0);
    sensors.set(SensorType::WastegatePosition, 0.0);
    let mut config = EngineConfig::default();
    config.etb.functions[1] = ThrottleFunction::Wastegate;
    let (mut ecu, mut sink) = armed_service(config, &sensors);

    for cmd in [
        AppCommand::SetIdlePosition(f32::NAN),
        AppCommand::SetWastegatePosition(f32::NAN),
        AppCommand::SetLuaAdjustment(f32::NAN),
        AppCommand::SetLuaAdjustment(f32::INFINITY),
    ] {
        ecu.handle_command(cmd, &sensors, 0, &mut sink).unwrap();
    }
    run_cycles(&mut ecu, &sensors, &EngineState::default(), &mut sink, 0, 10);

    let live = ecu.live_data(0).unwrap();
    assert!((live.adjusted_target - 30.0).abs() < 1e-4);
    for i in 0..2 {
        let motor = ecu.etb(i).unwrap().motor();
        assert!(motor.is_enabled());
        assert!(motor.duty().is_finite());
        assert!(
            motor
                .calls
                .iter()
                .all(|c| !matches!(c, MotorCall::Set(d) if !d.is_finite()))
        );
    }
}

// ── Sensor faults ─────────────────────────────────────────────

#[test]
fn repeated_tps_dropouts_latch_intermittent_status() {
    let mut sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::default();

    let mut now = 0;
    for _ in 0..51 {
        sensors.invalidate(SensorType::Tps1);
        now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 1);
        sensors.set(SensorType::Tps1, 0.0);
        now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 1);
    }

    let etb = ecu.etb(0).unwrap();
    assert_eq!(etb.status(), EtbStatus::IntermittentTps);
    assert!(!etb.motor().is_enabled());
    assert_eq!(etb.motor().last_call(), Some(&MotorCall::Disable("etb status")));
    assert_eq!(etb.live_data().status_code, 4);

    // reported once, on the edge
    let changes = sink.count(|e| {
        matches!(
            e,
            AppEvent::EtbStatusChanged {
                index: 0,
                to: EtbStatus::IntermittentTps,
                ..
            }
        )
    });
    assert_eq!(changes, 1);
    assert!(ecu.faults().iter().any(|f| f.kind
        == FaultKind::EtbStatus {
            index: 0,
            status: EtbStatus::IntermittentTps
        }));

    // the second throttle is unaffected
    assert_eq!(ecu.etb(1).unwrap().status(), EtbStatus::None);
}

#[test]
fn fifty_dropouts_are_tolerated() {
    let mut sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::default();

    let mut now = 0;
    for _ in 0..50 {
        sensors.invalidate(SensorType::Tps1);
        now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 1);
        sensors.set(SensorType::Tps1, 0.0);
        now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 1);
    }
    assert_eq!(ecu.etb(0).unwrap().status(), EtbStatus::None);
    assert!(ecu.etb(0).unwrap().motor().is_enabled());
}

// ── Limp gating ───────────────────────────────────────────────

#[test]
fn fatal_error_disables_throttles() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::default();

    let now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, 0, 5);
    assert!(ecu.etb(0).unwrap().motor().is_enabled());

    ecu.handle_command(AppCommand::FatalError, &sensors, now, &mut sink)
        .unwrap();
    run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 5);

    for i in 0..2 {
        let motor = ecu.etb(i).unwrap().motor();
        assert!(!motor.is_enabled());
        assert_eq!(motor.last_disable_reason(), Some("no-ETB"));
    }
    assert_eq!(ecu.limp().fault_rev_limit(), 0.0);
}

#[test]
fn direct_duty_bypasses_limp() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let engine = EngineState::default();

    ecu.handle_command(AppCommand::FatalError, &sensors, 0, &mut sink)
        .unwrap();
    ecu.handle_command(AppCommand::SetDirectDuty(30.0), &sensors, 0, &mut sink)
        .unwrap();
    let now = run_cycles(&mut ecu, &sensors, &engine, &mut sink, 0, 1);

    let etb = ecu.etb(0).unwrap();
    assert_eq!(etb.status(), EtbStatus::Manual);
    assert!(etb.motor().is_enabled());
    assert!((etb.motor().duty() - 0.3).abs() < 1e-6);
    assert!(matches!(etb.motor().last_call(), Some(MotorCall::Set(_))));

    ecu.handle_command(AppCommand::ClearDirectDuty, &sensors, now, &mut sink)
        .unwrap();
    run_cycles(&mut ecu, &sensors, &engine, &mut sink, now, 1);
    assert!(!ecu.etb(0).unwrap().motor().is_enabled());
}

#[test]
fn stuck_plate_escalates_when_configured() {
    let mut sensors = healthy_sensors();
    sensors.set(SensorType::AcceleratorPedal, 50.0);
    let mut config = EngineConfig::default();
    config.etb.integral_error_is_fault = true;
    let (mut ecu, mut sink) = armed_service(config, &sensors);

    // plate never moves off 0%
    run_cycles(&mut ecu, &sensors, &EngineState::default(), &mut sink, 0, 300);

    assert!(!ecu.limp().allow_electronic_throttle());
    assert_eq!(ecu.limp().etb_state().reason, ClearReason::EtbProblem);
    assert_eq!(ecu.limp().fault_rev_limit(), 1500.0);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::PermissionDenied {
                permission: Permission::Etb,
                reason: ClearReason::EtbProblem
            }
        )),
        1
    );
}

#[test]
fn stuck_plate_is_telemetry_only_by_default() {
    let mut sensors = healthy_sensors();
    sensors.set(SensorType::AcceleratorPedal, 50.0);
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);

    run_cycles(&mut ecu, &sensors, &EngineState::default(), &mut sink, 0, 300);

    assert!(ecu.etb(0).unwrap().has_integral_error_fault());
    assert!(ecu.limp().allow_electronic_throttle());
}

// ── Auto-calibration ──────────────────────────────────────────

#[test]
fn autocal_without_travel_commits_nothing() {
    let mut sensors = healthy_sensors();
    sensors.set_raw(SensorType::Tps1Primary, 0.5);
    sensors.set_raw(SensorType::Tps1Secondary, 4.5);
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);

    ecu.handle_command(AppCommand::RequestAutocal(0), &sensors, 0, &mut sink)
        .unwrap();
    assert!(ecu.etb(0).unwrap().is_autocal_requested());

    run_cycles(&mut ecu, &sensors, &EngineState::default(), &mut sink, 0, 1);

    let etb = ecu.etb(0).unwrap();
    assert!(!etb.is_autocal_requested());
    assert_eq!(etb.motor().last_disable_reason(), Some("autotune"));
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Calibration(_))), 0);
}

#[test]
fn autocal_refused_while_running() {
    let mut sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    sensors.set(SensorType::Rpm, 900.0);

    ecu.handle_command(AppCommand::RequestAutocal(1), &sensors, 0, &mut sink)
        .unwrap();
    run_cycles(&mut ecu, &sensors, &EngineState::running(), &mut sink, 0, 1);

    let etb = ecu.etb(1).unwrap();
    assert!(!etb.is_autocal_requested());
    assert!(!etb.motor().calls.contains(&MotorCall::Disable("autotune")));
}
