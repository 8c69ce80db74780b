//! Logical time primitives: [`Timestamp`], [`Interval`], and [`Tag`].

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A signed 64-bit nanosecond instant, relative to the federation's negotiated
/// start time.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Smallest representable instant, used as the [`Tag::NEVER`] sentinel.
    pub const NEVER: Timestamp = Timestamp(i64::MIN);
    /// Largest representable instant, used as the [`Tag::FOREVER`] sentinel.
    pub const FOREVER: Timestamp = Timestamp(i64::MAX);
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    /// Current wall-clock time, expressed as nanoseconds since the Unix epoch.
    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before UNIX epoch");
        Self(dur.as_nanos() as i64)
    }

    fn checked_add_interval(self, interval: Interval) -> Option<Self> {
        if self == Self::NEVER || self == Self::FOREVER {
            return Some(self);
        }
        self.0.checked_add(interval.as_nanos()).map(Self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NEVER => write!(f, "NEVER"),
            Self::FOREVER => write!(f, "FOREVER"),
            _ => write!(f, "{}ns", self.0),
        }
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Interval;
    fn sub(self, rhs: Self) -> Interval {
        Interval::from_nanos(self.0 - rhs.0)
    }
}

/// A duration between two [`Timestamp`]s, or the connection delay annotating an
/// edge in the federation's static dependency graph. Expected to be non-negative
/// in ordinary use, but the sign is not enforced here.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Interval(i64);

impl Interval {
    pub const ZERO: Interval = Interval(0);

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<std::time::Duration> for Interval {
    fn from(d: std::time::Duration) -> Self {
        Self(d.as_nanos() as i64)
    }
}

/// A totally ordered pair `(time, microstep)` naming a logical instant.
///
/// Comparison is lexicographic on `(time, microstep)`; the field declaration
/// order below is load-bearing for the derived `Ord`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub time: Timestamp,
    pub microstep: u32,
}

impl Tag {
    /// Sentinel meaning "no event will ever be produced at or after this tag".
    pub const NEVER: Tag = Tag {
        time: Timestamp::NEVER,
        microstep: 0,
    };

    /// Sentinel representing an instant beyond any tag the federation will reach.
    pub const FOREVER: Tag = Tag {
        time: Timestamp::FOREVER,
        microstep: 0,
    };

    pub const ZERO: Tag = Tag {
        time: Timestamp::ZERO,
        microstep: 0,
    };

    pub fn new(time: Timestamp, microstep: u32) -> Self {
        Self { time, microstep }
    }

    /// Add `interval` to this tag: a positive interval resets the microstep to
    /// zero, a zero interval preserves it (spec §3 "Tag" arithmetic).
    /// `NEVER.extend(_) == NEVER`.
    pub fn extend(self, interval: Interval) -> Self {
        if self == Self::NEVER {
            return Self::NEVER;
        }
        if interval.is_zero() {
            self
        } else {
            Self {
                time: self
                    .time
                    .checked_add_interval(interval)
                    .unwrap_or(Timestamp::FOREVER),
                microstep: 0,
            }
        }
    }

    /// The next microstep at the same time instant.
    pub fn next_microstep(self) -> Self {
        Self {
            time: self.time,
            microstep: self.microstep + 1,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.time, self.microstep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_compare_lexicographically() {
        let a = Tag::new(Timestamp::from_nanos(5), 0);
        let b = Tag::new(Timestamp::from_nanos(5), 1);
        let c = Tag::new(Timestamp::from_nanos(6), 0);
        assert!(a < b);
        assert!(b < c);
        assert!(Tag::NEVER < a);
        assert!(c < Tag::FOREVER);
    }

    #[test]
    fn extend_by_positive_interval_resets_microstep() {
        let t = Tag::new(Timestamp::from_nanos(5), 3);
        let extended = t.extend(Interval::from_nanos(10));
        assert_eq!(extended, Tag::new(Timestamp::from_nanos(15), 0));
    }

    #[test]
    fn extend_by_zero_preserves_microstep() {
        let t = Tag::new(Timestamp::from_nanos(5), 3);
        assert_eq!(t.extend(Interval::ZERO), t);
    }

    #[test]
    fn never_extended_is_never() {
        assert_eq!(Tag::NEVER.extend(Interval::from_nanos(10)), Tag::NEVER);
    }
}
