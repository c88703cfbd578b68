//! Throttle body bench: host simulation entry point.
//!
//! Runs the real controllers, limp manager and start/stop logic against a
//! simulated engine and two first-order throttle-plate plants.  Simulated
//! time advances one base tick per loop iteration, so a run finishes as
//! fast as the host allows.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  Sim pins (PWM, dir, disable, button, starter)                 │
//! │        │                                                       │
//! │  DcMotor ×2 ── StartStopButton ── SensorRegistry ── LogSink    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              EcuService (pure logic)                   │    │
//! │  │  ETB ×2 · Limp · Shutdown                              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (1 kHz base tick → 500 / 200 / 20 Hz)               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `throttlebody-bench [config.json] [seconds]`
#![deny(unused_must_use)]

use std::cell::Cell;
use std::convert::Infallible;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use embedded_hal::digital::{ErrorType as PinErrorType, InputPin, OutputPin};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};
use log::info;

use throttlebody::adapters::config_store::MemoryConfigStore;
use throttlebody::adapters::log_sink::LogEventSink;
use throttlebody::adapters::time::{StdClock, StdDelay};
use throttlebody::app::commands::AppCommand;
use throttlebody::app::ports::{ClockPort, ConfigPort};
use throttlebody::app::service::EcuService;
use throttlebody::config::{ETB_COUNT, EngineConfig};
use throttlebody::control::timer::{MICROS_PER_SECOND, Micros};
use throttlebody::drivers::dc_motor::DcMotor;
use throttlebody::engine::EngineState;
use throttlebody::scheduler::{BASE_TICK_HZ, Scheduler, SchedulerDelegate, Task};
use throttlebody::sensors::{SensorRegistry, SensorType};
use throttlebody::start_stop::StartStopButton;

const DEFAULT_RUN_SECS: f32 = 8.0;
const BASE_TICK_US: Micros = 1_000_000 / BASE_TICK_HZ as Micros;

// ── Simulated pins ────────────────────────────────────────────

#[derive(Clone, Default)]
struct SimPwm(Rc<Cell<u16>>);

impl PwmErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        1000
    }
    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
        self.0.set(duty);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SimPin(Rc<Cell<bool>>);

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.get())
    }
    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.get())
    }
}

type SimMotor = DcMotor<SimPwm, SimPin, SimPin>;

// ── Plant ─────────────────────────────────────────────────────

/// Spring-loaded plate: the motor pushes, the spring returns it to rest.
struct Plant {
    pwm: SimPwm,
    direction: SimPin,
    disabled: SimPin,
    position: f32,
}

impl Plant {
    /// %/s per unit duty.
    const GAIN: f32 = 900.0;
    /// 1/s.
    const SPRING: f32 = 12.0;
    /// Limp-home opening (%).
    const REST: f32 = 6.0;

    fn new() -> (Self, SimMotor) {
        let pwm = SimPwm::default();
        let direction = SimPin::default();
        let disabled = SimPin::default();
        let motor = DcMotor::new(pwm.clone(), direction.clone(), disabled.clone());
        let plant = Self {
            pwm,
            direction,
            disabled,
            position: Self::REST,
        };
        (plant, motor)
    }

    fn step(&mut self, dt: f32) {
        let duty = if self.disabled.0.get() {
            0.0
        } else {
            let magnitude = f32::from(self.pwm.0.get()) / 1000.0;
            if self.direction.0.get() { magnitude } else { -magnitude }
        };
        let accel = Self::GAIN * duty - Self::SPRING * (self.position - Self::REST);
        self.position = (self.position + accel * dt).clamp(0.0, 100.0);
    }
}

/// Sensor volts for a plate position; the secondary reads inverted.
fn tps_volts(position: f32) -> (f32, f32) {
    (0.5 + 0.04 * position, 4.5 - 0.04 * position)
}

// ── Bench ─────────────────────────────────────────────────────

struct Bench {
    ecu: EcuService<SimMotor>,
    sensors: SensorRegistry,
    engine: EngineState,
    plants: [Plant; ETB_COUNT],
    button: StartStopButton<SimPin, SimPin>,
    button_level: SimPin,
    starter: SimPin,
    store: MemoryConfigStore,
    sink: LogEventSink,
    delay: StdDelay,
    now: Micros,
    rpm: f32,
    cranking_secs: f32,
}

impl SchedulerDelegate for Bench {
    fn on_task_due(&mut self, task: Task) {
        match task {
            Task::EtbLoop => self
                .ecu
                .etb_tick(&self.sensors, &self.engine, self.now, &mut self.delay, &mut self.sink),
            Task::FastCallback => self
                .ecu
                .fast_tick(&self.sensors, &self.engine, self.now, &mut self.sink),
            Task::SlowCallback => self.ecu.slow_tick(
                &mut self.button,
                self.rpm,
                &self.engine,
                self.now,
                &mut self.store,
            ),
        }
    }
}

impl Bench {
    fn secs(&self) -> f32 {
        self.now as f32 / MICROS_PER_SECOND
    }

    /// Driver script: crank, blip the pedal, then stop the engine.
    fn drive(&mut self, run_secs: f32) {
        let t = self.secs();
        let pressed = (0.1..0.3).contains(&t) || (run_secs - 2.0..run_secs - 1.8).contains(&t);
        self.button_level.0.set(pressed);

        let pedal = if (1.5..3.0).contains(&t) {
            40.0 * (t - 1.5) / 1.5
        } else if (3.0..5.0).contains(&t) {
            40.0
        } else {
            0.0
        };
        self.sensors.set(SensorType::AcceleratorPedal, pedal);
        self.sensors.set(SensorType::DriverThrottleIntent, pedal);
    }

    /// Crude engine: the starter spins it up, fuel keeps it alive.
    fn step_engine(&mut self, dt: f32) {
        let fuel = self.ecu.limp().allow_injection().value;

        if self.starter.0.get() && !self.engine.is_running {
            self.rpm += (250.0 - self.rpm) * 5.0 * dt;
            self.cranking_secs += dt;
            if self.cranking_secs > 0.8 && fuel {
                info!("Engine started");
                self.engine.is_running = true;
                self.engine.seconds_since_engine_start = 0.0;
            }
        } else if self.engine.is_running && fuel {
            let target = 800.0 + 60.0 * self.plants[0].position;
            self.rpm += (target - self.rpm) * 2.0 * dt;
            self.engine.seconds_since_engine_start += dt;
        } else {
            self.rpm = (self.rpm - 1500.0 * dt).max(0.0);
            if self.rpm == 0.0 && self.engine.is_running {
                info!("Engine stopped");
                self.engine.is_running = false;
                self.cranking_secs = 0.0;
            }
        }

        self.engine.engine_moved_recently = self.rpm > 0.0;
        self.engine.has_synchronized_phase = self.engine.is_running;
    }

    fn publish_sensors(&mut self) {
        self.sensors.set(SensorType::Rpm, self.rpm);
        let channels = [
            (SensorType::Tps1, SensorType::Tps1Primary, SensorType::Tps1Secondary),
            (SensorType::Tps2, SensorType::Tps2Primary, SensorType::Tps2Secondary),
        ];
        for (plant, (tps, primary, secondary)) in self.plants.iter().zip(channels) {
            let (v1, v2) = tps_volts(plant.position);
            self.sensors.set(tps, plant.position);
            self.sensors.set_raw(primary, v1);
            self.sensors.set_raw(secondary, v2);
        }
    }

    fn step(&mut self, run_secs: f32) {
        let dt = BASE_TICK_US as f32 / MICROS_PER_SECOND;
        self.now += BASE_TICK_US;
        self.drive(run_secs);
        for plant in &mut self.plants {
            plant.step(dt);
        }
        self.step_engine(dt);
        self.publish_sensors();
    }

    fn report(&self) {
        let limp = self.ecu.limp_live_data(self.now);
        for i in 0..ETB_COUNT {
            if let Some(d) = self.ecu.live_data(i) {
                info!(
                    "t={:.1}s ETB{} | status={} target={:.1}% tps={:.1}% duty={:.2} ff={:.1} | rpm={:.0}",
                    self.secs(),
                    i + 1,
                    d.status,
                    d.adjusted_target,
                    self.plants[i].position,
                    d.duty,
                    d.feed_forward,
                    self.rpm,
                );
            }
        }
        info!(
            "t={:.1}s LIMP | injection={} ({}) ignition={} etb={} | rev limit {:.0}/{:.0}",
            self.secs(),
            limp.injection.value,
            limp.injection.reason,
            limp.ignition.value,
            limp.etb.value,
            limp.rev_limit,
            limp.resume_rpm,
        );
    }
}

fn load_config(path: Option<&str>, store: &mut MemoryConfigStore) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let config: EngineConfig =
                serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?;
            info!("Config loaded from {path}");
            config
        }
        None => {
            info!("Using default config");
            EngineConfig::default()
        }
    };
    // Round-trip through the store so the bench runs what firmware would load
    store.save(&config).map_err(|e| anyhow!("config rejected: {e}"))?;
    store.load().map_err(|e| anyhow!("config reload failed: {e}"))
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("╔══════════════════════════════════════╗");
    info!("║  Throttlebody bench v{}           ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let run_secs = match args.next() {
        Some(s) => s.parse::<f32>().with_context(|| format!("bad duration '{s}'"))?,
        None => DEFAULT_RUN_SECS,
    };

    let mut store = MemoryConfigStore::new();
    let config = load_config(config_path.as_deref(), &mut store)?;

    // ── Sensors ───────────────────────────────────────────────
    let mut sensors = SensorRegistry::new();
    sensors.register(SensorType::Tps1, true);
    sensors.register(SensorType::Tps2, true);
    sensors.register(SensorType::AcceleratorPedal, true);
    sensors.register(SensorType::AcceleratorPedalPrimary, false);
    sensors.set(SensorType::Rpm, 0.0);

    // ── Actuators ─────────────────────────────────────────────
    let (plant1, motor1) = Plant::new();
    let (plant2, motor2) = Plant::new();
    let button_level = SimPin::default();
    let starter = SimPin::default();
    let button = StartStopButton::new(button_level.clone(), starter.clone(), &config.start_stop);

    // ── Service ───────────────────────────────────────────────
    let mut sink = LogEventSink::new();
    let mut ecu = EcuService::new(config, [motor1, motor2]);
    ecu.init(&sensors, 0, &mut sink)?;
    ecu.handle_command(AppCommand::SetIgnition(true), &sensors, 0, &mut sink)?;
    ecu.handle_command(AppCommand::SetIdlePosition(30.0), &sensors, 0, &mut sink)?;

    let mut bench = Bench {
        ecu,
        sensors,
        engine: EngineState::default(),
        plants: [plant1, plant2],
        button,
        button_level,
        starter,
        store,
        sink,
        delay: StdDelay,
        now: 0,
        rpm: 0.0,
        cranking_secs: 0.0,
    };

    // ── Run ───────────────────────────────────────────────────
    let clock = StdClock::new();
    let mut sched = Scheduler::standard();
    let ticks = (run_secs * BASE_TICK_HZ as f32) as u64;

    for tick in 1..=ticks {
        bench.step(run_secs);
        sched.tick(&mut bench);
        if tick % u64::from(BASE_TICK_HZ) == 0 {
            bench.report();
        }
    }

    info!(
        "Simulated {:.1}s in {:.1}ms: {} ETB cycles, {} events, {} faults recorded",
        run_secs,
        clock.now_us() as f32 / 1000.0,
        sched.run_count(Task::EtbLoop),
        bench.sink.emitted(),
        bench.ecu.faults().total(),
    );
    for entry in bench.ecu.faults().iter() {
        info!("  fault @ {:.3}s: {:?}", entry.at as f32 / MICROS_PER_SECOND, entry.kind);
    }
    Ok(())
}
