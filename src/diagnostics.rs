//! Live data and fault history.
//!
//! Snapshot types exposed to the tuning/diagnostics layer, plus a bounded
//! ring of recent fault transitions.  The ring is fixed-size (`heapless`)
//! so recording a fault never allocates inside the control loop.

use heapless::Deque;

use crate::app::events::Permission;
use crate::control::timer::Micros;
use crate::limp::{ClearReason, LimpState};
use crate::throttle::{EtbStatus, ThrottleFunction};

const FAULT_LOG_SLOTS: usize = 16;

/// Per-controller live data.
#[derive(Debug, Clone, PartialEq)]
pub struct EtbLiveData {
    pub function: ThrottleFunction,
    pub armed: bool,
    pub status: EtbStatus,
    /// 8-bit status code as shown in the tuning tool.
    pub status_code: u8,
    /// Pedal map output before idle/trim/limits.
    pub current_target: f32,
    pub target_with_idle: f32,
    /// Final target after every adjustment and clamp.
    pub adjusted_target: f32,
    pub feed_forward: f32,
    pub trim: f32,
    pub tc_drop: f32,
    /// Combined loop output (%); `None` when the loop had no valid output.
    pub output: Option<f32>,
    /// Duty currently on the motor.
    pub duty: f32,
    pub duty_average: f32,
    pub duty_rate_of_change: f32,
    pub integral_error: f32,
    pub tps_error_counter: u16,
    pub pps_error_counter: u16,
    pub rev_limit_active: bool,
    pub jam_detected: bool,
    /// Seconds the integrator has been over the jam limit.
    pub jam_timer: f32,
    pub is_autotune: bool,
    pub autotune_amplitude: f32,
    pub autotune_period: f32,
}

/// Limp manager live data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimpLiveData {
    pub injection: LimpState,
    pub ignition: LimpState,
    pub etb: LimpState,
    pub trigger_input: LimpState,
    pub rev_limit: f32,
    pub resume_rpm: f32,
    pub fault_rev_limit: f32,
    pub timing_retard: f32,
    pub fuel_correction: f32,
    pub time_since_any_cut: f32,
}

/// What a fault history entry records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaultKind {
    EtbStatus { index: usize, status: EtbStatus },
    EtbInit { index: usize, status: EtbStatus },
    PermissionDenied { permission: Permission, reason: ClearReason },
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultEntry {
    pub at: Micros,
    pub kind: FaultKind,
}

/// Most recent fault transitions; the oldest entry drops off when full.
#[derive(Debug, Default)]
pub struct FaultLog {
    entries: Deque<FaultEntry, FAULT_LOG_SLOTS>,
    total: u32,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: Micros, kind: FaultKind) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        // cannot fail: a slot was freed above
        let _ = self.entries.push_back(FaultEntry { at, kind });
        self.total = self.total.saturating_add(1);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &FaultEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&FaultEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Faults recorded since boot, including evicted ones.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
