//! Arc-length intervals along a flowline.
//!
//! Distances are measured from the first vertex of the parent line, in grid
//! linear units. Intervals are closed-open like the rest of the crate treats
//! them: two intervals sharing only an endpoint do not overlap.

use std::cmp::Ordering;
use std::fmt;

/// A range of arc-length `[start, end)` along a parent line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcInterval {
    pub start: f64,
    pub end: f64,
}

impl ArcInterval {
    /// Create a new interval.
    #[inline]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Returns the length of the interval.
    #[inline]
    pub fn len(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Returns true if the interval is no longer than `tolerance`.
    #[inline]
    pub fn is_empty(&self, tolerance: f64) -> bool {
        self.len() <= tolerance
    }

    /// Arc-length at the middle of the interval.
    #[inline]
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.start + self.end)
    }

    /// Check if this interval overlaps another by a positive length.
    #[inline]
    pub fn overlaps(&self, other: &ArcInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Compute the overlap length with another interval.
    #[inline]
    pub fn overlap_length(&self, other: &ArcInterval) -> f64 {
        if !self.overlaps(other) {
            return 0.0;
        }
        self.end.min(other.end) - self.start.max(other.start)
    }

    /// True when `other` starts where this interval ends, within `tolerance`.
    #[inline]
    pub fn abuts(&self, other: &ArcInterval, tolerance: f64) -> bool {
        (other.start - self.end).abs() <= tolerance
    }

    /// Union of two touching or overlapping intervals.
    #[inline]
    pub fn join(&self, other: &ArcInterval, tolerance: f64) -> Option<ArcInterval> {
        if self.start > other.end + tolerance || other.start > self.end + tolerance {
            return None;
        }
        Some(ArcInterval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        })
    }

    /// Fraction of a line of `total` length covered up to `s`, clamped to `[0, 1]`.
    #[inline]
    pub fn fraction(s: f64, total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        (s / total).clamp(0.0, 1.0)
    }
}

impl fmt::Display for ArcInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl Eq for ArcInterval {}

impl Ord for ArcInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .total_cmp(&other.start)
            .then(self.end.total_cmp(&other.end))
    }
}

impl PartialOrd for ArcInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Linear interpolation of an attribute along a line by arc-length.
///
/// `s` is clamped to the line so the result never leaves
/// `[min(start, end), max(start, end)]`.
#[inline]
pub fn interpolate(start_value: f64, end_value: f64, s: f64, total: f64) -> f64 {
    let value = start_value + (end_value - start_value) * ArcInterval::fraction(s, total);
    let (lo, hi) = if start_value <= end_value {
        (start_value, end_value)
    } else {
        (end_value, start_value)
    };
    value.clamp(lo, hi)
}
