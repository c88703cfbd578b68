//! Permission flags that remember why they were withdrawn.

use core::fmt;

/// Why a permission is currently withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ClearReason {
    #[default]
    None = 0,
    Fatal,
    /// Disabled in configuration.
    Settings,
    HardLimit,
    FaultRevLimit,
    BoostCut,
    OilPressure,
    StopRequested,
    EtbProblem,
    LaunchCut,
    InjectorDutyCycle,
    FloodClear,
    EnginePhase,
    IgnitionOff,
    Lua,
    Acr,
    LambdaProtection,
    GdiComms,
}

impl fmt::Display for ClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Fatal => "fatal error",
            Self::Settings => "disabled in settings",
            Self::HardLimit => "rev limit",
            Self::FaultRevLimit => "fault rev limit",
            Self::BoostCut => "boost cut",
            Self::OilPressure => "oil pressure",
            Self::StopRequested => "stop requested",
            Self::EtbProblem => "throttle problem",
            Self::LaunchCut => "launch control",
            Self::InjectorDutyCycle => "injector duty cycle",
            Self::FloodClear => "flood clear",
            Self::EnginePhase => "waiting for phase sync",
            Self::IgnitionOff => "ignition off",
            Self::Lua => "script",
            Self::Acr => "compression release",
            Self::LambdaProtection => "lambda protection",
            Self::GdiComms => "GDI module comms",
        };
        f.write_str(s)
    }
}

/// A boolean permission that can only be withdrawn.
///
/// There is no way to set a cleared flag again: a fresh one has to be
/// built, which is what the per-tick transient flags do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clearable {
    value: bool,
    reason: ClearReason,
}

impl Clearable {
    /// A flag seeded from a configuration switch.  A disabled switch starts
    /// cleared with [`ClearReason::Settings`].
    pub const fn new(value: bool) -> Self {
        Self {
            value,
            reason: if value { ClearReason::None } else { ClearReason::Settings },
        }
    }

    /// Withdraw the permission.  The latest reason is the one reported.
    pub fn clear(&mut self, reason: ClearReason) {
        self.value = false;
        self.reason = reason;
    }

    pub const fn is_allowed(&self) -> bool {
        self.value
    }

    pub const fn reason(&self) -> ClearReason {
        self.reason
    }
}

/// A permission answer plus the cause when it is a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimpState {
    pub value: bool,
    pub reason: ClearReason,
}

impl LimpState {
    pub const ALLOWED: Self = Self {
        value: true,
        reason: ClearReason::None,
    };

    pub const fn denied(reason: ClearReason) -> Self {
        Self { value: false, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_setting_starts_cleared() {
        let c = Clearable::new(false);
        assert!(!c.is_allowed());
        assert_eq!(c.reason(), ClearReason::Settings);
    }

    #[test]
    fn latest_reason_reported() {
        let mut c = Clearable::new(true);
        assert!(c.is_allowed());
        c.clear(ClearReason::HardLimit);
        c.clear(ClearReason::BoostCut);
        assert!(!c.is_allowed());
        assert_eq!(c.reason(), ClearReason::BoostCut);
    }
}
