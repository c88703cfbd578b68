//! Sensor identifiers and the in-memory sensor registry.
//!
//! Drivers publish converted readings into a [`SensorRegistry`]; the
//! controllers only ever read through the
//! [`SensorPort`](crate::app::ports::SensorPort) trait, so every lookup
//! returns a validity-tagged value the caller has to check.

use crate::app::ports::SensorPort;
use crate::error::SensorError;

/// Every sensor channel the throttle and limp logic reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SensorType {
    Rpm = 0,
    VehicleSpeed,
    WheelSlipRatio,
    Map,
    Clt,
    OilPressure,
    DriverThrottleIntent,

    AcceleratorPedal,
    AcceleratorPedalPrimary,
    AcceleratorPedalSecondary,

    Tps1,
    Tps1Primary,
    Tps1Secondary,
    Tps2,
    Tps2Primary,
    Tps2Secondary,

    IdlePosition,
    WastegatePosition,
}

impl SensorType {
    /// Total number of sensor channels, used to size the registry.
    pub const COUNT: usize = 18;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Rpm => "RPM",
            Self::VehicleSpeed => "VehicleSpeed",
            Self::WheelSlipRatio => "WheelSlipRatio",
            Self::Map => "MAP",
            Self::Clt => "CLT",
            Self::OilPressure => "OilPressure",
            Self::DriverThrottleIntent => "DriverThrottleIntent",
            Self::AcceleratorPedal => "AcceleratorPedal",
            Self::AcceleratorPedalPrimary => "AcceleratorPedalPrimary",
            Self::AcceleratorPedalSecondary => "AcceleratorPedalSecondary",
            Self::Tps1 => "TPS1",
            Self::Tps1Primary => "TPS1Primary",
            Self::Tps1Secondary => "TPS1Secondary",
            Self::Tps2 => "TPS2",
            Self::Tps2Primary => "TPS2Primary",
            Self::Tps2Secondary => "TPS2Secondary",
            Self::IdlePosition => "IdlePosition",
            Self::WastegatePosition => "WastegatePosition",
        }
    }
}

/// One registry slot.
#[derive(Debug, Clone, Copy, Default)]
struct SensorSlot {
    registered: bool,
    redundant: bool,
    valid: bool,
    value: f32,
    /// Pre-conversion reading (volts for analog channels).
    raw: f32,
}

/// Fixed-size table of the latest reading per [`SensorType`].
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    slots: [SensorSlot; SensorType::COUNT],
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self {
            slots: [SensorSlot::default(); SensorType::COUNT],
        }
    }

    /// Register a channel.  `redundant` marks a channel backed by two
    /// cross-checked inputs (pedal, throttle position).
    pub fn register(&mut self, id: SensorType, redundant: bool) {
        let slot = &mut self.slots[id.index()];
        slot.registered = true;
        slot.redundant = redundant;
    }

    pub fn unregister(&mut self, id: SensorType) {
        self.slots[id.index()] = SensorSlot::default();
    }

    /// Publish a valid reading.  Registers the channel if needed.
    pub fn set(&mut self, id: SensorType, value: f32) {
        let slot = &mut self.slots[id.index()];
        slot.registered = true;
        slot.valid = true;
        slot.value = value;
    }

    /// Mark the latest reading invalid (e.g. out of range, redundancy mismatch).
    pub fn invalidate(&mut self, id: SensorType) {
        self.slots[id.index()].valid = false;
    }

    pub fn set_raw(&mut self, id: SensorType, raw: f32) {
        let slot = &mut self.slots[id.index()];
        slot.registered = true;
        slot.raw = raw;
    }
}

impl SensorPort for SensorRegistry {
    fn has_sensor(&self, id: SensorType) -> bool {
        self.slots[id.index()].registered
    }

    fn get(&self, id: SensorType) -> Result<f32, SensorError> {
        let slot = &self.slots[id.index()];
        if !slot.registered {
            Err(SensorError::Missing)
        } else if !slot.valid {
            Err(SensorError::Invalid)
        } else {
            Ok(slot.value)
        }
    }

    fn get_raw(&self, id: SensorType) -> f32 {
        self.slots[id.index()].raw
    }

    fn is_redundant(&self, id: SensorType) -> bool {
        let slot = &self.slots[id.index()];
        slot.registered && slot.redundant
    }
}
