//! Clocks and second-granularity time values
//!
//! Token lifetimes are expressed in whole seconds since the Unix epoch.
//! All time-based decisions in this crate go through the [`Clock`] trait so
//! that tests can force tokens to appear valid or expired.

use std::{fmt, ops, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Unix time
///
/// The number of seconds elapsed since 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let time = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("times before Unix epoch are not expected")
            .as_secs();

        UnixTime(time)
    }
}

/// A duration with second granularity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct DurationSecs(pub u64);

impl DurationSecs {
    /// The smaller of the two durations
    #[inline]
    #[must_use]
    pub fn min(self, other: DurationSecs) -> DurationSecs {
        DurationSecs(self.0.min(other.0))
    }

    /// The larger of the two durations
    #[inline]
    #[must_use]
    pub fn max(self, other: DurationSecs) -> DurationSecs {
        DurationSecs(self.0.max(other.0))
    }
}

impl fmt::Display for DurationSecs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl ops::Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_add(rhs.0))
    }
}

impl ops::Sub<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Sub<UnixTime> for UnixTime {
    type Output = DurationSecs;

    #[inline]
    fn sub(self, rhs: UnixTime) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Mul<f64> for DurationSecs {
    type Output = DurationSecs;

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    #[inline]
    fn mul(self, rhs: f64) -> Self::Output {
        DurationSecs((self.0 as f64 * rhs) as u64)
    }
}

impl From<DurationSecs> for std::time::Duration {
    #[inline]
    fn from(d: DurationSecs) -> Self {
        std::time::Duration::from_secs(d.0)
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A test clock which maintains the current time as internal state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestClock(UnixTime);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        self.0
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    #[inline]
    pub const fn new(time: UnixTime) -> Self {
        Self(time)
    }

    /// Updates the clock's current time to `val`
    pub fn set(&mut self, val: UnixTime) {
        self.0 = val;
    }

    /// Increments the clock's current time by `inc` seconds
    pub fn inc(&mut self, inc: u64) {
        (self.0).0 += inc;
    }
}
