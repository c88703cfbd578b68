//! Elapsed-time tracking against an explicit monotonic clock.
//!
//! Timestamps are microseconds since boot, supplied by the caller each tick
//! (see [`ClockPort`](crate::app::ports::ClockPort)).  A timer that has never
//! been reset reports an unbounded elapsed time, so anything gated on
//! freshness starts out stale.

/// Microseconds since boot.
pub type Micros = u64;

pub const MICROS_PER_SECOND: f32 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    last_reset: Option<Micros>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { last_reset: None }
    }

    pub fn reset(&mut self, now: Micros) {
        self.last_reset = Some(now);
    }

    /// Seconds since the last reset; `f32::INFINITY` if never reset.
    pub fn elapsed_secs(&self, now: Micros) -> f32 {
        match self.last_reset {
            Some(at) => now.saturating_sub(at) as f32 / MICROS_PER_SECOND,
            None => f32::INFINITY,
        }
    }

    pub fn has_elapsed_secs(&self, now: Micros, secs: f32) -> bool {
        self.elapsed_secs(now) >= secs
    }

    /// Seconds since the last reset, then reset.  `None` on the first call.
    pub fn elapsed_secs_and_reset(&mut self, now: Micros) -> Option<f32> {
        let elapsed = self.last_reset.map(|_| self.elapsed_secs(now));
        self.reset(now);
        elapsed
    }

    pub fn is_started(&self) -> bool {
        self.last_reset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_reset_is_infinitely_old() {
        let t = Timer::new();
        assert!(t.has_elapsed_secs(0, 1000.0));
    }

    #[test]
    fn elapsed_tracks_reset_point() {
        let mut t = Timer::new();
        t.reset(1_000_000);
        assert!((t.elapsed_secs(1_500_000) - 0.5).abs() < 1e-6);
        assert!(!t.has_elapsed_secs(1_500_000, 0.6));
    }

    #[test]
    fn elapsed_and_reset_skips_first_edge() {
        let mut t = Timer::new();
        assert_eq!(t.elapsed_secs_and_reset(10), None);
        assert_eq!(t.elapsed_secs_and_reset(1_000_010), Some(1.0));
    }
}
