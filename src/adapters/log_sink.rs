//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade.  A tuning-software or CAN adapter would implement the
//! same trait.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written since construction.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            AppEvent::Calibration(cal) => {
                info!("CAL | mode={:?} | value={:.4}", cal.mode, cal.value);
            }
            AppEvent::EtbStatusChanged { index, from, to } => {
                info!("ETB | #{} status {} -> {} (code {})", index + 1, from, to, to.code());
            }
            AppEvent::EtbInitFailed { index, reason } => {
                warn!("ETB | #{} init failed: {} (code {})", index + 1, reason, reason.code());
            }
            AppEvent::PermissionDenied { permission, reason } => {
                warn!("LIMP | {:?} denied: {}", permission, reason);
            }
            AppEvent::PermissionRestored(permission) => {
                info!("LIMP | {:?} restored", permission);
            }
            AppEvent::Fatal => {
                error!("FATAL | all outputs disabled until restart");
            }
        }
    }
}
