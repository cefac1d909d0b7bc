//! TimeStamp - source-reported sample time
//!
//! Seconds since the Unix epoch as `f64`. A non-finite value marks an
//! undefined time, which decoders may hand over when a sentence carried no
//! usable clock. The bus stores such samples as-is; the validator reports them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Sample time in seconds since 1970-01-01T00:00:00Z.
///
/// `Eq`/`Ord` use [`f64::total_cmp`] so timestamps can key ordered maps and
/// the replay scheduler's timeout set.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(f64);

impl TimeStamp {
    /// Undefined time
    pub const UNDEFINED: TimeStamp = TimeStamp(f64::NAN);

    #[inline]
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        Self(millis as f64 / 1000.0)
    }

    #[inline]
    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Whole milliseconds since the epoch, truncated towards negative infinity.
    #[inline]
    pub fn as_millis(self) -> i64 {
        (self.0 * 1000.0).floor() as i64
    }

    #[inline]
    pub fn is_defined(self) -> bool {
        self.0.is_finite()
    }

    /// Shift by a signed number of seconds.
    #[inline]
    pub fn add_secs(self, secs: f64) -> Self {
        Self(self.0 + secs)
    }

    /// Absolute distance to `other` in seconds.
    #[inline]
    pub fn abs_diff_secs(self, other: TimeStamp) -> f64 {
        (self.0 - other.0).abs()
    }

    /// Round down to a multiple of `bin` (used for time histograms).
    pub fn floor_to(self, bin: Duration) -> Self {
        let bin_ms = bin.as_millis().max(1) as i64;
        Self::from_millis(self.as_millis().div_euclid(bin_ms) * bin_ms)
    }
}

/// Difference in seconds
impl Sub for TimeStamp {
    type Output = f64;

    #[inline]
    fn sub(self, rhs: TimeStamp) -> f64 {
        self.0 - rhs.0
    }
}

impl Add<Duration> for TimeStamp {
    type Output = TimeStamp;

    #[inline]
    fn add(self, rhs: Duration) -> TimeStamp {
        Self(self.0 + rhs.as_secs_f64())
    }
}

impl Sub<Duration> for TimeStamp {
    type Output = TimeStamp;

    #[inline]
    fn sub(self, rhs: Duration) -> TimeStamp {
        Self(self.0 - rhs.as_secs_f64())
    }
}

impl PartialEq for TimeStamp {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeStamp {}

impl PartialOrd for TimeStamp {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(f, "{:.3}s", self.0)
        } else {
            f.write_str("undefined")
        }
    }
}

impl fmt::Debug for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeStamp({})", self)
    }
}
