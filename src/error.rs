//! Unified error types for the throttle body controller.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! periodic drivers' error handling uniform. All variants are `Copy` so they
//! can be passed through the limp manager and the live-data layer without
//! allocation.

use core::fmt;

use crate::throttle::EtbStatus;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// A sensor could not be read or returned implausible data.
    Sensor(SensorError),
    /// An actuator command failed.
    Actuator(ActuatorError),
    /// A throttle controller refused to arm.
    Init(EtbInitError),
    /// The open/close calibration sweep did not complete.
    Autocal(AutocalError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Init(e) => write!(f, "init: {e}"),
            Self::Autocal(e) => write!(f, "autocal: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// No sensor is registered under the requested identifier.
    Missing,
    /// The sensor is registered but its latest reading is not valid.
    Invalid,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "sensor not configured"),
            Self::Invalid => write!(f, "reading invalid"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// PWM duty-cycle write failed.
    PwmWriteFailed,
    /// Direction or disable pin write failed.
    GpioWriteFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PwmWriteFailed => write!(f, "PWM write failed"),
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Throttle init errors
// ---------------------------------------------------------------------------

/// Reasons a throttle controller refuses to arm.  The controller stays
/// unarmed until the next configuration reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtbInitError {
    /// No function selected for this H-bridge.
    NoFunction,
    /// A throttle function was selected but no pedal is configured.
    NoPedal,
    /// The throttle position sensor for this function is not configured.
    MissingTps,
    /// The throttle position sensor has no redundant secondary.
    TpsNotRedundant,
    /// The accelerator pedal sensor has no redundant secondary.
    PedalNotRedundant,
}

impl EtbInitError {
    /// Status code reported through live data for this failure.
    pub const fn status(self) -> EtbStatus {
        match self {
            Self::NoFunction | Self::NoPedal => EtbStatus::None,
            Self::MissingTps => EtbStatus::TpsError,
            Self::TpsNotRedundant | Self::PedalNotRedundant => EtbStatus::Redundancy,
        }
    }
}

impl fmt::Display for EtbInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFunction => write!(f, "no function selected"),
            Self::NoPedal => write!(f, "throttle requires a pedal"),
            Self::MissingTps => write!(f, "throttle position sensor not configured"),
            Self::TpsNotRedundant => {
                write!(f, "electronic throttle requires a redundant position sensor")
            }
            Self::PedalNotRedundant => {
                write!(f, "electronic throttle requires a redundant accelerator pedal")
            }
        }
    }
}

impl From<EtbInitError> for Error {
    fn from(e: EtbInitError) -> Self {
        Self::Init(e)
    }
}

// ---------------------------------------------------------------------------
// Auto-calibration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutocalError {
    /// Sweep refused because the engine is turning.
    EngineRunning,
    /// The controller was never armed with a motor.
    NoMotor,
    /// Only throttle functions can be calibrated.
    NotAThrottle,
    /// The sweep did not move the primary sensor far enough.
    SweepTooSmall { open: f32, closed: f32 },
}

impl fmt::Display for AutocalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineRunning => write!(f, "engine is running"),
            Self::NoMotor => write!(f, "no motor"),
            Self::NotAThrottle => write!(f, "function is not a throttle"),
            Self::SweepTooSmall { open, closed } => write!(
                f,
                "check your wiring! closed voltage: {closed:.1}v open voltage: {open:.1}v"
            ),
        }
    }
}

impl From<AutocalError> for Error {
    fn from(e: AutocalError) -> Self {
        Self::Autocal(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
