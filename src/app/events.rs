//! Outbound application events.
//!
//! The [`EcuService`](super::service::EcuService) and the throttle
//! controllers emit these through the [`EventSink`](super::ports::EventSink)
//! port.  Adapters on the other side decide what to do with them: log to
//! serial, forward to a tuning tool, publish on CAN, etc.

use crate::limp::ClearReason;
use crate::throttle::EtbStatus;

/// Which calibration value a [`CalibrationEvent`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalMode {
    /// Nothing in progress; the tuning tool should clear its prompt.
    None,
    /// Relay autotune estimate of the proportional gain.
    EtbKp,
    /// Relay autotune estimate of the integral gain.
    EtbKi,
    /// Relay autotune estimate of the derivative gain.
    EtbKd,
    /// Throttle #1 primary/secondary position sensor end points (10-bit ADC).
    Tps1Max,
    Tps1Min,
    Tps1SecondaryMax,
    Tps1SecondaryMin,
    /// Throttle #2 primary/secondary position sensor end points (10-bit ADC).
    Tps2Max,
    Tps2Min,
    Tps2SecondaryMax,
    Tps2SecondaryMin,
}

impl CalMode {
    /// Gain published for autotune parameter index 0..=2 (P, I, D).
    pub const fn for_autotune_param(index: u8) -> Self {
        match index {
            0 => Self::EtbKp,
            1 => Self::EtbKi,
            _ => Self::EtbKd,
        }
    }
}

/// One value on the calibration channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEvent {
    pub mode: CalMode,
    pub value: f32,
}

/// Which top-level permission a limp change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Injection,
    Ignition,
    Etb,
    TriggerInput,
}

/// Structured events emitted by the control core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A value for the external tuning display.
    Calibration(CalibrationEvent),

    /// A throttle controller changed its status code.
    EtbStatusChanged {
        index: usize,
        from: EtbStatus,
        to: EtbStatus,
    },

    /// A throttle controller refused to arm.
    EtbInitFailed { index: usize, reason: EtbStatus },

    /// A limp permission was withdrawn.
    PermissionDenied {
        permission: Permission,
        reason: ClearReason,
    },

    /// A limp permission was granted again.
    PermissionRestored(Permission),

    /// Unrecoverable fault: everything is off until restart.
    Fatal,
}
