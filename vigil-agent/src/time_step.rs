//! Drift-free periodic time sequence
//!
//! A [`TimeStep`] represents `start + index * step`. Advancing it never
//! accumulates the latency of whoever advances it, so a check scheduled
//! every 60 seconds stays on its grid even when each run starts late.

use std::time::Duration;
use tokio::time::Instant;

/// Granularity used when jumping past a time point: the smallest index
/// whose value is `>= to` is computed on `elapsed - EPSILON`.
const EPSILON_NANOS: u128 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeStep {
    start_point: Instant,
    step: Duration,
    step_index: u64,
}

impl TimeStep {
    /// A zero step is raised to one nanosecond.
    pub fn new(start_point: Instant, step: Duration) -> Self {
        Self {
            start_point,
            step: step.max(Duration::from_nanos(1)),
            step_index: 0,
        }
    }

    pub fn start_point(&self) -> Instant {
        self.start_point
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    /// Current time point: `start + step * index`.
    pub fn value(&self) -> Instant {
        let offset = self.step.as_nanos().saturating_mul(u128::from(self.step_index));
        self.start_point + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
    }

    pub fn increment(&mut self) {
        self.step_index += 1;
    }

    /// Move to the smallest index whose value is `>= to`.
    ///
    /// The index never goes backwards: fast-forwarding to a point already
    /// behind the current value leaves the sequence untouched.
    pub fn fast_forward(&mut self, to: Instant) {
        let elapsed = to.saturating_duration_since(self.start_point).as_nanos();
        if elapsed == 0 {
            return;
        }
        let index = (elapsed - EPSILON_NANOS) / self.step.as_nanos() + 1;
        let index = u64::try_from(index).unwrap_or(u64::MAX);
        if index > self.step_index {
            self.step_index = index;
        }
    }

    /// Advance by one step, then catch up with `now` if still behind it.
    pub fn advance_past(&mut self, now: Instant) {
        self.increment();
        if self.value() < now {
            self.fast_forward(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_start_plus_index_steps() {
        let start = Instant::now();
        let mut ts = TimeStep::new(start, Duration::from_secs(60));
        assert_eq!(ts.value(), start);
        ts.increment();
        ts.increment();
        assert_eq!(ts.value(), start + Duration::from_secs(120));
        assert_eq!(ts.step_index(), 2);
    }

    #[test]
    fn test_fast_forward_lands_on_first_point_not_before_target() {
        let start = Instant::now();
        let step = Duration::from_secs(10);

        for elapsed_ms in [1u64, 9_999, 10_000, 10_001, 25_000, 30_000, 123_456] {
            let mut ts = TimeStep::new(start, step);
            let target = start + Duration::from_millis(elapsed_ms);
            ts.fast_forward(target);
            assert!(ts.value() >= target, "elapsed {}ms", elapsed_ms);
            assert!(ts.value() - step < target, "elapsed {}ms", elapsed_ms);
        }
    }

    #[test]
    fn test_fast_forward_exact_boundary() {
        let start = Instant::now();
        let mut ts = TimeStep::new(start, Duration::from_secs(10));
        ts.fast_forward(start + Duration::from_secs(20));
        assert_eq!(ts.step_index(), 2);
        assert_eq!(ts.value(), start + Duration::from_secs(20));
    }

    #[test]
    fn test_fast_forward_sub_microsecond_step() {
        let start = Instant::now();
        let step = Duration::from_nanos(300);
        let mut ts = TimeStep::new(start, step);

        ts.fast_forward(start + Duration::from_nanos(600));
        assert_eq!(ts.step_index(), 2);

        ts.fast_forward(start + Duration::from_nanos(601));
        assert_eq!(ts.step_index(), 3);
        assert_eq!(ts.value(), start + Duration::from_nanos(900));
    }

    #[test]
    fn test_fast_forward_never_goes_backwards() {
        let start = Instant::now();
        let mut ts = TimeStep::new(start, Duration::from_secs(1));
        ts.fast_forward(start + Duration::from_secs(50));
        assert_eq!(ts.step_index(), 50);

        ts.fast_forward(start + Duration::from_secs(3));
        assert_eq!(ts.step_index(), 50);

        ts.fast_forward(start);
        assert_eq!(ts.step_index(), 50);
    }

    #[test]
    fn test_advance_past_skips_missed_points() {
        let start = Instant::now();
        let mut ts = TimeStep::new(start, Duration::from_secs(10));

        ts.advance_past(start + Duration::from_secs(1));
        assert_eq!(ts.value(), start + Duration::from_secs(10));

        ts.advance_past(start + Duration::from_secs(45));
        assert_eq!(ts.value(), start + Duration::from_secs(50));
    }

    #[test]
    fn test_zero_step_is_clamped() {
        let start = Instant::now();
        let mut ts = TimeStep::new(start, Duration::ZERO);
        ts.fast_forward(start + Duration::from_nanos(5));
        assert_eq!(ts.step_index(), 5);
    }
}
