//! Wall-clock primitives and the process-global clock correction
//!
//! Local clocks are never trusted directly. Modules read raw time through
//! a [`ClockSource`] and apply the correction published in the
//! [`SkewRegister`] when they need a network-wide notion of now.

use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock instant, microseconds since the Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WallTime(i64);

impl WallTime {
    pub const EPOCH: WallTime = WallTime(0);

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        WallTime(micros)
    }

    #[inline]
    pub fn from_secs(secs: i64) -> Self {
        WallTime(secs * 1_000_000)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Sub<WallTime> for WallTime {
    type Output = TimeDelta;

    #[inline]
    fn sub(self, rhs: WallTime) -> TimeDelta {
        TimeDelta(self.0 - rhs.0)
    }
}

impl Add<TimeDelta> for WallTime {
    type Output = WallTime;

    #[inline]
    fn add(self, rhs: TimeDelta) -> WallTime {
        WallTime(self.0 + rhs.0)
    }
}

impl Sub<TimeDelta> for WallTime {
    type Output = WallTime;

    #[inline]
    fn sub(self, rhs: TimeDelta) -> WallTime {
        WallTime(self.0 - rhs.0)
    }
}

impl fmt::Debug for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{:.6}s", self.as_secs_f64())
    }
}

/// Signed clock offset, microseconds
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const ZERO: TimeDelta = TimeDelta(0);

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        TimeDelta(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        TimeDelta(millis * 1_000)
    }

    /// Truncating conversion from fractional seconds
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        TimeDelta((secs * 1_000_000.0) as i64)
    }

    /// Rebuild from whole seconds plus fractional microseconds
    #[inline]
    pub fn from_parts(secs: i64, fracs: i64) -> Self {
        TimeDelta(secs * 1_000_000 + fracs)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Whole-second component, truncated toward zero
    #[inline]
    pub fn whole_seconds(self) -> i64 {
        self.0 / 1_000_000
    }

    /// Fractional component in microseconds, same sign as the whole part
    #[inline]
    pub fn subsec_micros(self) -> i64 {
        self.0 % 1_000_000
    }
}

impl Add<TimeDelta> for TimeDelta {
    type Output = TimeDelta;

    #[inline]
    fn add(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(self.0 + rhs.0)
    }
}

impl Sub<TimeDelta> for TimeDelta {
    type Output = TimeDelta;

    #[inline]
    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(self.0 - rhs.0)
    }
}

impl Neg for TimeDelta {
    type Output = TimeDelta;

    #[inline]
    fn neg(self) -> TimeDelta {
        TimeDelta(-self.0)
    }
}

impl fmt::Debug for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.6}s", self.as_secs_f64())
    }
}

/// Process-global clock correction.
///
/// The synchronizer stores the latest additive correction at the end of
/// each exchange round; any reader needing network time does a plain
/// load. Held as whole nanoseconds in one word so no locking is needed.
#[derive(Debug, Default)]
pub struct SkewRegister(AtomicI64);

impl SkewRegister {
    pub const fn new() -> Self {
        SkewRegister(AtomicI64::new(0))
    }

    pub fn store(&self, correction: TimeDelta) {
        self.0
            .store(correction.as_micros().saturating_mul(1_000), Ordering::Relaxed);
    }

    pub fn load(&self) -> TimeDelta {
        TimeDelta::from_micros(self.0.load(Ordering::Relaxed) / 1_000)
    }
}

/// Source of raw, unsynchronized local time
pub trait ClockSource: Send + Sync {
    fn wall_now(&self) -> WallTime;
}

/// The operating system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn wall_now(&self) -> WallTime {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        WallTime::from_micros(since_epoch.as_micros() as i64)
    }
}

/// Settable clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: WallTime) -> Self {
        ManualClock(AtomicI64::new(start.as_micros()))
    }

    pub fn set(&self, t: WallTime) {
        self.0.store(t.as_micros(), Ordering::Relaxed);
    }

    pub fn advance(&self, d: TimeDelta) {
        self.0.fetch_add(d.as_micros(), Ordering::Relaxed);
    }
}

impl ClockSource for ManualClock {
    fn wall_now(&self) -> WallTime {
        WallTime::from_micros(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_time_arithmetic() {
        let t0 = WallTime::from_secs(100);
        let t1 = t0 + TimeDelta::from_millis(250);
        assert_eq!(t1 - t0, TimeDelta::from_millis(250));
        assert_eq!(t1 - TimeDelta::from_millis(250), t0);
    }

    #[test]
    fn test_delta_parts_roundtrip() {
        let d = TimeDelta::from_parts(7, 250_000);
        assert_eq!(d.whole_seconds(), 7);
        assert_eq!(d.subsec_micros(), 250_000);
        assert_eq!(
            TimeDelta::from_parts(d.whole_seconds(), d.subsec_micros()),
            d
        );

        let neg = TimeDelta::from_micros(-1_500_000);
        assert_eq!(neg.whole_seconds(), -1);
        assert_eq!(neg.subsec_micros(), -500_000);
        assert_eq!(
            TimeDelta::from_parts(neg.whole_seconds(), neg.subsec_micros()),
            neg
        );
    }

    #[test]
    fn test_secs_f64_truncates() {
        let d = TimeDelta::from_secs_f64(1.5);
        assert_eq!(d.as_micros(), 1_500_000);
        let neg = TimeDelta::from_secs_f64(-0.25);
        assert_eq!(neg.as_micros(), -250_000);
    }

    #[test]
    fn test_skew_register_roundtrip() {
        let reg = SkewRegister::new();
        assert_eq!(reg.load(), TimeDelta::ZERO);

        reg.store(TimeDelta::from_millis(-42));
        assert_eq!(reg.load(), TimeDelta::from_millis(-42));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(WallTime::from_secs(5));
        clock.advance(TimeDelta::from_millis(10));
        assert_eq!(clock.wall_now(), WallTime::from_micros(5_010_000));
    }
}
