//! Logical time and tags.
//!
//! Logical time is the deterministic virtual clock of an environment. It is
//! stored as signed nanoseconds since the Unix epoch so that it maps one to
//! one onto the 64-bit timestamp trailer used on the wire.

use std::fmt::{self, Display};
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// LogicalTime
// ============================================================================

/// A point on the logical time line, in nanoseconds since the Unix epoch.
///
/// Totally ordered and monotonic within one execution of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalTime(i64);

impl LogicalTime {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: LogicalTime = LogicalTime(0);

    /// The largest representable time point.
    pub const MAX: LogicalTime = LogicalTime(i64::MAX);

    /// Creates a time point from nanoseconds since the Unix epoch.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a time point from milliseconds since the Unix epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns nanoseconds since the Unix epoch.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Adds a duration, returning `None` on overflow.
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let nanos = i64::try_from(duration.as_nanos()).ok()?;
        self.0.checked_add(nanos).map(Self)
    }

    /// Adds a duration, saturating at [`LogicalTime::MAX`].
    pub fn saturating_add(self, duration: Duration) -> Self {
        self.checked_add(duration).unwrap_or(Self::MAX)
    }

    /// Returns `self - earlier`, or `None` if `earlier` is later than `self`.
    pub fn checked_duration_since(self, earlier: LogicalTime) -> Option<Duration> {
        let delta = self.0.checked_sub(earlier.0)?;
        u64::try_from(delta).ok().map(Duration::from_nanos)
    }

    /// Returns `self - earlier`, or zero if `earlier` is later than `self`.
    pub fn saturating_duration_since(self, earlier: LogicalTime) -> Duration {
        self.checked_duration_since(earlier).unwrap_or(Duration::ZERO)
    }
}

impl Add<Duration> for LogicalTime {
    type Output = LogicalTime;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000);
        write!(f, "{secs}.{nanos:09}")
    }
}

impl From<LogicalTime> for i64 {
    fn from(time: LogicalTime) -> Self {
        time.0
    }
}

// ============================================================================
// Tag
// ============================================================================

/// A logical time plus a microstep.
///
/// Events scheduled with zero delay run at the same logical time but a
/// later microstep, so superdense time stays totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub time: LogicalTime,
    pub microstep: u32,
}

impl Tag {
    pub const fn new(time: LogicalTime, microstep: u32) -> Self {
        Self { time, microstep }
    }

    /// The tag an event lands on when scheduled `delay` after this one.
    pub fn delay(self, delay: Duration) -> Self {
        if delay.is_zero() {
            self.next_microstep()
        } else {
            Self::new(self.time + delay, 0)
        }
    }

    pub fn next_microstep(self) -> Self {
        Self::new(self.time, self.microstep.saturating_add(1))
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.time, self.microstep)
    }
}
