//! Host time adapters.
//!
//! [`StdClock`] implements [`ClockPort`] over `std::time::Instant` and
//! [`StdDelay`] implements `embedded_hal::delay::DelayNs` with a thread
//! sleep.  Both back the bench binary; firmware builds supply their own.

use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;

use crate::app::ports::ClockPort;
use crate::control::timer::Micros;

/// Monotonic microseconds since construction.
pub struct StdClock {
    start: Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl ClockPort for StdClock {
    fn now_us(&self) -> Micros {
        self.start.elapsed().as_micros() as Micros
    }
}

/// Blocking delay backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}
