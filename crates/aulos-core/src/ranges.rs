#![forbid(unsafe_code)]

//! Buffered-range math.
//!
//! The playback device reports its buffered data as an ordered list of
//! non-overlapping `[start, end)` ranges. The stall detector and the buffer
//! loops reason about the gap between the current position and those ranges.

/// A contiguous buffered time range, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Whether `position` falls inside this range.
    #[must_use]
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// The range containing `position`, if any.
#[must_use]
pub fn range_at(ranges: &[TimeRange], position: f64) -> Option<TimeRange> {
    ranges.iter().copied().find(|r| r.contains(position))
}

/// The first range starting strictly after `position`.
#[must_use]
pub fn next_range_after(ranges: &[TimeRange], position: f64) -> Option<TimeRange> {
    ranges.iter().copied().find(|r| r.start > position)
}

/// Seconds of contiguous buffered data ahead of `position`.
///
/// Infinite when `position` is not inside any range.
#[must_use]
pub fn left_size_of_range(ranges: &[TimeRange], position: f64) -> f64 {
    range_at(ranges, position).map_or(f64::INFINITY, |r| r.end - position)
}

/// Distance from `position` to the start of the next range.
///
/// Infinite when there is no next range.
#[must_use]
pub fn next_range_gap(ranges: &[TimeRange], position: f64) -> f64 {
    next_range_after(ranges, position).map_or(f64::INFINITY, |r| r.start - position)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ranges() -> Vec<TimeRange> {
        vec![
            TimeRange::new(0.0, 10.0),
            TimeRange::new(10.5, 20.0),
            TimeRange::new(25.0, 30.0),
        ]
    }

    #[rstest]
    #[case(5.0, Some(TimeRange::new(0.0, 10.0)))]
    #[case(10.2, None)]
    #[case(10.5, Some(TimeRange::new(10.5, 20.0)))]
    #[case(30.0, None)]
    fn range_lookup(#[case] position: f64, #[case] expected: Option<TimeRange>) {
        assert_eq!(range_at(&ranges(), position), expected);
    }

    #[test]
    fn left_size_inside_range() {
        assert!((left_size_of_range(&ranges(), 5.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn left_size_outside_range_is_infinite() {
        assert!(left_size_of_range(&ranges(), 22.0).is_infinite());
    }

    #[rstest]
    #[case(5.0, 5.5)]
    #[case(20.0, 5.0)]
    fn gap_to_next_range(#[case] position: f64, #[case] expected: f64) {
        assert!((next_range_gap(&ranges(), position) - expected).abs() < 1e-9);
    }

    #[test]
    fn gap_without_next_range_is_infinite() {
        assert!(next_range_gap(&ranges(), 29.0).is_infinite());
    }
}
