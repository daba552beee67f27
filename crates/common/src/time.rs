//! Media time arithmetic.
//!
//! Timestamps are rational: a `value` counted in units of `1/timescale`
//! seconds. This keeps frame durations such as `1/24` exact, and lets
//! trim ranges be expressed at millisecond precision without float drift.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timescale used for trim ranges (milliseconds).
pub const MILLISECOND_TIMESCALE: i32 = 1000;

/// A rational media timestamp.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    /// Time zero.
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a new timestamp. A non-positive timescale is clamped to 1.
    pub fn new(value: i64, timescale: i32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Convert seconds to a timestamp at the given timescale (rounded).
    pub fn from_seconds(secs: f64, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        Self {
            value: (secs * timescale as f64).round() as i64,
            timescale,
        }
    }

    /// The timestamp in seconds.
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Convert to a `Duration`, saturating negative values at zero.
    pub fn to_duration(&self) -> Duration {
        Duration::from_secs_f64(self.seconds().max(0.0))
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Rescale to another timescale (rounded to nearest).
    pub fn rescale(&self, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        let scaled = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let rounded = (scaled + den / 2 * scaled.signum()) / den;
        Self {
            value: rounded as i64,
            timescale,
        }
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

/// A half-open time range `[start, start + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    /// Build a range from start and end timestamps sharing a timescale.
    pub fn from_start_end(start: MediaTime, end: MediaTime) -> Self {
        let end = end.rescale(start.timescale);
        Self {
            start,
            duration: MediaTime::new(end.value - start.value, start.timescale),
        }
    }

    /// End of the range in seconds.
    pub fn end_seconds(&self) -> f64 {
        self.start.seconds() + self.duration.seconds()
    }
}
