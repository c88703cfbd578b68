//! Service lifecycle: arming, configuration reload and persistence, and
//! the scheduler and start/stop button driving the periodic entry points.

use core::convert::Infallible;
use std::cell::Cell;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use throttlebody::adapters::config_store::MemoryConfigStore;
use throttlebody::app::commands::AppCommand;
use throttlebody::app::events::AppEvent;
use throttlebody::app::ports::{ConfigError, ConfigPort, SensorPort};
use throttlebody::app::service::EcuService;
use throttlebody::config::EngineConfig;
use throttlebody::control::timer::Micros;
use throttlebody::diagnostics::FaultKind;
use throttlebody::engine::EngineState;
use throttlebody::error::Error;
use throttlebody::limp::ClearReason;
use throttlebody::scheduler::{Scheduler, SchedulerDelegate, Task};
use throttlebody::sensors::{SensorRegistry, SensorType};
use throttlebody::start_stop::StartStopButton;
use throttlebody::throttle::{EtbStatus, ThrottleFunction};

use crate::mock_hw::{LogSink, MockMotor, MotorCall, NoDelay, armed_service, healthy_sensors};

const MS: Micros = 1_000;
const SEC: Micros = 1_000_000;

// ── Pins ──────────────────────────────────────────────────────

struct Pin(Rc<Cell<bool>>);

impl ErrorType for Pin {
    type Error = Infallible;
}

impl InputPin for Pin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.get())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.get())
    }
}

impl OutputPin for Pin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

// ── Arming ────────────────────────────────────────────────────

#[test]
fn single_wire_tps_leaves_channel_unarmed() {
    let mut sensors = healthy_sensors();
    sensors.register(SensorType::Tps2, false);

    let mut sink = LogSink::new();
    let mut ecu = EcuService::new(EngineConfig::default(), [MockMotor::new(), MockMotor::new()]);
    ecu.init(&sensors, 0, &mut sink).unwrap();

    assert!(ecu.is_etb_configured(0));
    assert!(!ecu.is_etb_configured(1));
    assert!(!ecu.etb(1).unwrap().is_armed());
    assert_eq!(ecu.etb(1).unwrap().status(), EtbStatus::Redundancy);
    assert_eq!(
        sink.events,
        vec![AppEvent::EtbInitFailed {
            index: 1,
            reason: EtbStatus::Redundancy
        }]
    );
    assert_eq!(
        ecu.faults().latest().map(|f| f.kind),
        Some(FaultKind::EtbInit {
            index: 1,
            status: EtbStatus::Redundancy
        })
    );
}

#[test]
fn pedal_with_idle_valve_only_fails_init() {
    let sensors = healthy_sensors();
    let mut config = EngineConfig::default();
    config.etb.functions = [ThrottleFunction::IdleValve, ThrottleFunction::None];

    let mut sink = LogSink::new();
    let mut ecu = EcuService::new(config, [MockMotor::new(), MockMotor::new()]);
    let result = ecu.init(&sensors, 0, &mut sink);

    assert!(matches!(result, Err(Error::Config(_))));
    assert!(ecu.etb(0).unwrap().is_armed());
    assert!(!ecu.is_etb_configured(0));
    assert!(!ecu.is_etb_configured(1));
}

#[test]
fn reload_rearms_for_new_function() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    assert!(ecu.is_etb_configured(1));

    let mut config = EngineConfig::default();
    config.etb.functions[1] = ThrottleFunction::Wastegate;
    ecu.handle_command(AppCommand::UpdateConfig(Box::new(config)), &sensors, SEC, &mut sink)
        .unwrap();

    let etb = ecu.etb(1).unwrap();
    assert!(etb.is_armed());
    assert_eq!(etb.function(), ThrottleFunction::Wastegate);
    assert!(!ecu.is_etb_configured(1));
    assert!(ecu.is_config_dirty());
}

#[test]
fn reload_with_invalid_config_keeps_old_one() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);

    let mut config = EngineConfig::default();
    config.etb.minimum_position = 80.0;
    config.etb.maximum_position = 20.0;
    let result = ecu.handle_command(AppCommand::UpdateConfig(Box::new(config)), &sensors, SEC, &mut sink);

    assert!(result.is_err());
    assert_eq!(ecu.config(), &EngineConfig::default());
    assert!(!ecu.is_config_dirty());
}

// ── Persistence ───────────────────────────────────────────────

#[test]
fn updated_config_is_persisted_after_settling() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let mut store = MemoryConfigStore::new();
    assert_eq!(store.load(), Err(ConfigError::NotFound));

    let mut config = EngineConfig::default();
    config.limp.rpm_hard_limit = 6500.0;
    ecu.handle_command(AppCommand::UpdateConfig(Box::new(config.clone())), &sensors, SEC, &mut sink)
        .unwrap();

    assert!(!ecu.auto_save_if_needed(&mut store, 3 * SEC));
    assert_eq!(store.save_count(), 0);

    assert!(ecu.auto_save_if_needed(&mut store, 6 * SEC + 100 * MS));
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.load(), Ok(config));

    // nothing further to write
    assert!(!ecu.auto_save_if_needed(&mut store, 20 * SEC));
    assert_eq!(store.save_count(), 1);
}

#[test]
fn explicit_save_flushes_on_next_check() {
    let sensors = healthy_sensors();
    let (mut ecu, mut sink) = armed_service(EngineConfig::default(), &sensors);
    let mut store = MemoryConfigStore::new();

    ecu.handle_command(AppCommand::SaveConfig, &sensors, 10 * SEC, &mut sink)
        .unwrap();
    assert!(ecu.auto_save_if_needed(&mut store, 10 * SEC));
    assert_eq!(store.load(), Ok(EngineConfig::default()));
}

#[test]
fn force_save_ignores_settling_delay() {
    let sensors = healthy_sensors();
    let (mut ecu, _) = armed_service(EngineConfig::default(), &sensors);
    let mut store = MemoryConfigStore::new();

    assert!(!ecu.force_save_if_dirty(&mut store));
    ecu.mark_config_dirty(SEC);
    assert!(ecu.force_save_if_dirty(&mut store));
    assert_eq!(store.save_count(), 1);
}

// ── Scheduler ─────────────────────────────────────────────────

struct Harness {
    ecu: EcuService<MockMotor>,
    sensors: SensorRegistry,
    engine: EngineState,
    sink: LogSink,
    delay: NoDelay,
    store: MemoryConfigStore,
    button: StartStopButton<Pin, Pin>,
    now: Micros,
}

impl SchedulerDelegate for Harness {
    fn on_task_due(&mut self, task: Task) {
        match task {
            Task::EtbLoop => {
                self.ecu
                    .etb_tick(&self.sensors, &self.engine, self.now, &mut self.delay, &mut self.sink);
            }
            Task::FastCallback => self.ecu.fast_tick(&self.sensors, &self.engine, self.now, &mut self.sink),
            Task::SlowCallback => {
                let rpm = self.sensors.get_or_zero(SensorType::Rpm);
                self.ecu
                    .slow_tick(&mut self.button, rpm, &self.engine, self.now, &mut self.store);
            }
        }
    }
}

fn harness(button_level: &Rc<Cell<bool>>, starter: &Rc<Cell<bool>>) -> Harness {
    let sensors = healthy_sensors();
    let config = EngineConfig::default();
    let button = StartStopButton::new(
        Pin(button_level.clone()),
        Pin(starter.clone()),
        &config.start_stop,
    );
    let (ecu, sink) = armed_service(config, &sensors);
    Harness {
        ecu,
        sensors,
        engine: EngineState::default(),
        sink,
        delay: NoDelay::default(),
        store: MemoryConfigStore::new(),
        button,
        now: 0,
    }
}

fn run(scheduler: &mut Scheduler, h: &mut Harness, ticks: u32) {
    for _ in 0..ticks {
        h.now += MS;
        scheduler.tick(h);
    }
}

#[test]
fn scheduler_drives_every_rate() {
    let level = Rc::new(Cell::new(false));
    let starter = Rc::new(Cell::new(false));
    let mut h = harness(&level, &starter);
    let mut scheduler = Scheduler::standard();

    run(&mut scheduler, &mut h, 1000);

    assert_eq!(scheduler.run_count(Task::EtbLoop), 500);
    assert_eq!(scheduler.run_count(Task::FastCallback), 200);
    assert_eq!(scheduler.run_count(Task::SlowCallback), 20);

    for i in 0..2 {
        let sets = h
            .ecu
            .etb(i)
            .unwrap()
            .motor()
            .calls
            .iter()
            .filter(|c| matches!(c, MotorCall::Set(_)))
            .count();
        assert_eq!(sets, 500);
    }
}

#[test]
fn button_cranks_then_stops_engine() {
    let level = Rc::new(Cell::new(false));
    let starter = Rc::new(Cell::new(false));
    let mut h = harness(&level, &starter);
    let mut scheduler = Scheduler::standard();

    // press and hold past the debounce window
    level.set(true);
    run(&mut scheduler, &mut h, 200);
    level.set(false);
    assert!(starter.get());
    assert!(h.button.is_starter_engaged());

    // engine catches
    h.engine = EngineState::running();
    h.sensors.set(SensorType::Rpm, 900.0);
    run(&mut scheduler, &mut h, 200);
    assert!(!starter.get());
    assert!(h.ecu.limp().allow_injection().value);

    // second press stops it
    level.set(true);
    run(&mut scheduler, &mut h, 200);
    level.set(false);
    assert!(h.ecu.is_engine_stop(h.now));
    assert_eq!(h.ecu.limp().allow_injection().reason, ClearReason::StopRequested);
    assert_eq!(h.button.toggle_count(), 2);
}
