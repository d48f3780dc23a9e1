//! Monotonic time base shared by the controller and its host harnesses.
//!
//! The control loop is a fixed-rate cooperative tick, so a plain
//! milliseconds-since-boot counter is all the engine needs. Platforms feed
//! whatever clock they have into [`Instant::from_millis`].

use core::fmt;
use core::ops::Add;
use core::time::Duration;

/// Monotonic timestamp in milliseconds since boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Instant(u64);

impl Instant {
    /// The boot instant.
    pub const ZERO: Self = Self(0);

    /// Creates an instant from a raw millisecond count.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the raw millisecond count.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Duration elapsed since `earlier`, saturating to zero if `earlier`
    /// is in the future.
    #[must_use]
    pub fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
