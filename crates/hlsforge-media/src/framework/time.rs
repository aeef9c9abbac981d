//! Rational media time.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// A point or span on a media timeline, `value / timescale` seconds.
///
/// Arithmetic keeps the left operand's timescale; the right operand is
/// rescaled (rounding to nearest) before combining. Comparison is exact.
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    /// Whole seconds at timescale 1.
    pub const fn from_secs(secs: i64) -> Self {
        Self::new(secs, 1)
    }

    /// Nearest representable time at `timescale`.
    pub fn from_seconds_f64(secs: f64, timescale: u32) -> Self {
        Self::new((secs * timescale as f64).round() as i64, timescale)
    }

    /// A zero timescale has no meaning and marks an invalid time.
    pub fn is_valid(&self) -> bool {
        self.timescale != 0
    }

    pub fn seconds(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.value as f64 / self.timescale as f64
        }
    }

    /// Rescale to another timescale, rounding half away from zero.
    pub fn convert_scale(&self, timescale: u32) -> Self {
        if timescale == self.timescale || !self.is_valid() || timescale == 0 {
            return *self;
        }
        let num = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let half = den / 2;
        let scaled = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        Self::new(scaled as i64, timescale)
    }

    fn cross(&self, other: &Self) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
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
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl Add for MediaTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if !rhs.is_valid() {
            return self;
        }
        let rhs = rhs.convert_scale(self.timescale);
        Self::new(self.value + rhs.value, self.timescale)
    }
}

impl Sub for MediaTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        if !rhs.is_valid() {
            return self;
        }
        let rhs = rhs.convert_scale(self.timescale);
        Self::new(self.value - rhs.value, self.timescale)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rescales_right_operand() {
        let pts = MediaTime::new(3003, 30000);
        let shifted = pts + MediaTime::from_secs(10);

        assert_eq!(shifted.timescale, 30000);
        assert_eq!(shifted.value, 303003);
    }

    #[test]
    fn test_sub_across_timescales() {
        let a = MediaTime::new(96000, 48000);
        let b = MediaTime::new(1000, 1000);
        assert_eq!(a - b, MediaTime::from_secs(1));
    }

    #[test]
    fn test_equality_and_order_are_exact() {
        assert_eq!(MediaTime::new(1, 2), MediaTime::new(45000, 90000));
        assert!(MediaTime::new(1, 3) < MediaTime::new(33334, 100000));
        assert!(MediaTime::new(-1, 1) < MediaTime::ZERO);
    }

    #[test]
    fn test_convert_scale_rounds_to_nearest() {
        assert_eq!(MediaTime::new(1, 3).convert_scale(1000).value, 333);
        assert_eq!(MediaTime::new(2, 3).convert_scale(1000).value, 667);
        assert_eq!(MediaTime::new(-2, 3).convert_scale(1000).value, -667);
    }

    #[test]
    fn test_invalid_timescale() {
        let t = MediaTime::new(10, 0);
        assert!(!t.is_valid());
        assert_eq!(t.seconds(), 0.0);
    }
}
