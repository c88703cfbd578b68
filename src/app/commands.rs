//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (tuning
//! software, console, scripts, other ECU modules) that the
//! [`EcuService`](super::service::EcuService) interprets and acts upon.

use crate::config::EngineConfig;

/// Commands that external adapters can send into the control core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Idle valve target / idle compression input (%).
    SetIdlePosition(f32),

    /// Wastegate target (%).
    SetWastegatePosition(f32),

    /// Script throttle adjustment (%); goes stale after 200 ms.
    SetLuaAdjustment(f32),

    /// Run the open/close sensor sweep on one channel.
    RequestAutocal(usize),

    /// Manual duty (%) on every armed channel, bypassing control.  NaN
    /// clears the override.
    SetDirectDuty(f32),

    /// Return to closed-loop control.
    ClearDirectDuty,

    /// Restart every controller's PID on its next output.
    ResetPid,

    /// Hot-reload calibration (controllers are re-initialised).
    UpdateConfig(Box<EngineConfig>),

    /// Persist the current config on the next auto-save check.
    SaveConfig,

    /// Ignition switch edge.
    SetIgnition(bool),

    /// A frame arrived from the external GDI module.
    GdiCommsReceived,

    /// Begin the engine-stop sequence.
    StopEngine,

    /// Unrecoverable fault: disable everything until restart.
    FatalError,

    /// Erase the fault history ring.
    ClearFaultLog,
}
