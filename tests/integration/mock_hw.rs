//! Mock hardware adapters for integration tests.
//!
//! Records every motor call so tests can assert on the full command
//! history without touching real PWM/GPIO.

use throttlebody::app::events::AppEvent;
use throttlebody::app::ports::{EventSink, MotorPort};
use throttlebody::config::EngineConfig;
use throttlebody::app::service::EcuService;
use throttlebody::sensors::{SensorRegistry, SensorType};

// ── Motor call record ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum MotorCall {
    Enable,
    Disable(&'static str),
    Set(f32),
}

// ── MockMotor ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockMotor {
    pub calls: Vec<MotorCall>,
    enabled: bool,
    duty: f32,
}

#[allow(dead_code)]
impl MockMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_call(&self) -> Option<&MotorCall> {
        self.calls.last()
    }

    /// Reason given by the most recent disable.
    pub fn last_disable_reason(&self) -> Option<&'static str> {
        self.calls.iter().rev().find_map(|c| match c {
            MotorCall::Disable(reason) => Some(*reason),
            _ => None,
        })
    }
}

impl MotorPort for MockMotor {
    fn enable(&mut self) {
        self.enabled = true;
        self.calls.push(MotorCall::Enable);
    }

    fn disable(&mut self, reason: &'static str) {
        self.enabled = false;
        self.duty = 0.0;
        self.calls.push(MotorCall::Disable(reason));
    }

    fn set(&mut self, duty: f32) {
        self.duty = duty;
        self.calls.push(MotorCall::Set(duty));
    }

    fn duty(&self) -> f32 {
        self.duty
    }
}

// ── Recording event sink ──────────────────────────────────────

#[derive(Debug, Default)]
pub struct LogSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── No-op delay ───────────────────────────────────────────────

/// Returns immediately; counts requested time.
#[derive(Debug, Default)]
pub struct NoDelay {
    pub total_ns: u64,
}

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// Redundant pedal and both throttle position sensors, all reading valid.
pub fn healthy_sensors() -> SensorRegistry {
    let mut s = SensorRegistry::new();
    s.register(SensorType::AcceleratorPedal, true);
    s.register(SensorType::AcceleratorPedalPrimary, false);
    s.register(SensorType::Tps1, true);
    s.register(SensorType::Tps2, true);
    s.set(SensorType::AcceleratorPedal, 0.0);
    s.set(SensorType::Tps1, 0.0);
    s.set(SensorType::Tps2, 0.0);
    s.set(SensorType::Rpm, 0.0);
    s
}

/// Service with both channels armed as throttles and ignition on.
#[allow(dead_code)]
pub fn armed_service(config: EngineConfig, sensors: &SensorRegistry) -> (EcuService<MockMotor>, LogSink) {
    let mut sink = LogSink::new();
    let mut ecu = EcuService::new(config, [MockMotor::new(), MockMotor::new()]);
    ecu.init(sensors, 0, &mut sink).expect("init");
    ecu.handle_command(
        throttlebody::app::commands::AppCommand::SetIgnition(true),
        sensors,
        0,
        &mut sink,
    )
    .expect("ignition");
    (ecu, sink)
}
