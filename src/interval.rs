//! Interval algebra primitives.
//!
//! All matching, extension, and de-duplication logic downstream is
//! expressed in terms of these helpers, so they must be exact and
//! side-effect-free. Intervals are half-open `[start, end)` in minutes.

use crate::models::DAY_MINUTES;

/// Minutes of overlap between two intervals, never negative.
pub fn overlap_minutes(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> i64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0)
}

/// True iff the two intervals share more than zero minutes.
pub fn overlaps(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    overlap_minutes(a_start, a_end, b_start, b_end) > 0
}

/// Clamp a minute offset into the day bounds [0, 1440].
pub fn clamp_to_day(minutes: i64) -> i64 {
    minutes.clamp(0, DAY_MINUTES)
}

/// Merge intervals whose gap is at most `gap_tolerance` minutes. Touching
/// or overlapping intervals always merge; brief gaps count as the same
/// continuous activity. Input order does not matter.
pub fn merge_intervals(mut intervals: Vec<(i64, i64)>, gap_tolerance: i64) -> Vec<(i64, i64)> {
    intervals.retain(|(start, end)| end > start);
    if intervals.is_empty() {
        return intervals;
    }
    intervals.sort_by_key(|(start, _)| *start);

    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some((_, last_end)) if start - *last_end <= gap_tolerance => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_basic() {
        assert_eq!(overlap_minutes(0, 60, 30, 90), 30);
        assert_eq!(overlap_minutes(0, 60, 60, 90), 0);
        assert_eq!(overlap_minutes(0, 60, 70, 90), 0);
        assert_eq!(overlap_minutes(10, 50, 0, 100), 40);
    }

    #[test]
    fn overlaps_requires_positive_overlap() {
        assert!(overlaps(0, 60, 59, 70));
        assert!(!overlaps(0, 60, 60, 70));
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_to_day(-5), 0);
        assert_eq!(clamp_to_day(700), 700);
        assert_eq!(clamp_to_day(2000), 1440);
    }

    #[test]
    fn merge_with_gap_tolerance() {
        // A gap exactly at the tolerance merges; one past it stays split.
        let merged = merge_intervals(vec![(0, 10), (25, 40), (12, 20)], 5);
        assert_eq!(merged, vec![(0, 40)]);

        let split = merge_intervals(vec![(0, 10), (26, 40), (12, 20)], 5);
        assert_eq!(split, vec![(0, 20), (26, 40)]);
    }

    #[test]
    fn merge_touching_always() {
        let merged = merge_intervals(vec![(0, 10), (10, 20)], 0);
        assert_eq!(merged, vec![(0, 20)]);
    }

    #[test]
    fn merge_drops_empty_intervals() {
        let merged = merge_intervals(vec![(5, 5), (10, 8), (0, 3)], 0);
        assert_eq!(merged, vec![(0, 3)]);
    }
}
