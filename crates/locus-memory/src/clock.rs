//! Logical time source.
//!
//! The clock only moves when asked to. Every entity timestamp in the store
//! is a reading of this clock, so two writes separated by [`Clock::add_tick`]
//! are strictly ordered.

use chrono::{DateTime, Utc};
use locus_types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug)]
pub struct Clock {
    ticks: AtomicI64,
    /// Ticks per unit accepted by [`Clock::round_time`].
    resolution: i64,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A clock resumed at `t`, used when reopening a persisted store.
    pub fn starting_at(t: Timestamp) -> Self {
        Self {
            ticks: AtomicI64::new(t),
            resolution: 1,
        }
    }

    pub fn with_resolution(mut self, resolution: i64) -> Self {
        self.resolution = resolution.max(1);
        self
    }

    pub fn now(&self) -> Timestamp {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Advance by `n` ticks and return the new reading.
    pub fn add_tick(&self, n: i64) -> Timestamp {
        self.ticks.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Convert a span of `units` into ticks.
    pub fn round_time(&self, units: i64) -> i64 {
        units.max(0) * self.resolution
    }

    /// Wall-clock time of the host, independent of the logical ticks.
    pub fn world_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_monotonic() {
        let clock = Clock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.add_tick(1), 1);
        assert_eq!(clock.add_tick(3), 4);
        assert_eq!(clock.now(), 4);
    }

    #[test]
    fn resumed_clock_keeps_counting() {
        let clock = Clock::starting_at(41);
        assert_eq!(clock.add_tick(1), 42);
    }

    #[test]
    fn round_time_scales_by_resolution() {
        let clock = Clock::new().with_resolution(20);
        assert_eq!(clock.round_time(300), 6000);
        assert_eq!(clock.round_time(-5), 0);
        assert_eq!(Clock::new().with_resolution(0).round_time(7), 7);
    }
}
