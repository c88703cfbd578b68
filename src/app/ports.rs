//! Port traits: the hexagonal boundary between control logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ EcuService (domain)
//! ```
//!
//! Driven adapters (sensors, motors, event sinks, storage, clock) implement
//! these traits.  The [`EcuService`](super::service::EcuService) and the
//! controllers consume them via generics, so the control core never
//! touches hardware directly.

use crate::config::EngineConfig;
use crate::control::timer::Micros;
use crate::error::SensorError;
use crate::sensors::SensorType;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: named sensor lookup returning valid-or-invalid readings.
pub trait SensorPort {
    /// Whether a sensor is configured for this channel at all.
    fn has_sensor(&self, id: SensorType) -> bool;

    /// Latest converted reading, or why there is none.
    fn get(&self, id: SensorType) -> Result<f32, SensorError>;

    /// Latest reading, or 0 when missing or invalid.
    fn get_or_zero(&self, id: SensorType) -> f32 {
        self.get(id).unwrap_or(0.0)
    }

    /// Pre-conversion reading (volts for analog channels).
    fn get_raw(&self, id: SensorType) -> f32;

    /// Whether this channel is backed by two cross-checked inputs.
    fn is_redundant(&self, id: SensorType) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Motor port (driven adapter: domain → H-bridge)
// ───────────────────────────────────────────────────────────────

/// Write-side port for one DC motor actuator.
pub trait MotorPort {
    /// Energise the bridge.
    fn enable(&mut self);

    /// De-energise the bridge.  `reason` is kept for diagnostics.
    fn disable(&mut self, reason: &'static str);

    /// Set duty in `[-1, 1]`; sign selects direction.
    fn set(&mut self, duty: f32);

    /// Last commanded duty.
    fn duty(&self) -> f32;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, tuning
/// software channel, CAN, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time source.
pub trait ClockPort {
    /// Microseconds since boot.
    fn now_us(&self) -> Micros;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists engine configuration.
///
/// Implementations MUST validate before persisting.  Invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], never silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    fn load(&self) -> Result<EngineConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &EngineConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
