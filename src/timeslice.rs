//! Time-slice arithmetic.
//!
//! All analysis operates on integer time-slice indices rather than raw
//! nanosecond timestamps. A slice is a fixed-width window of wall-clock time;
//! conversion rounds period starts half-up and period ends half-down so that
//! a period shorter than one slice still maps to a non-empty slice range.

/// Absolute wall-clock timestamp in nanoseconds.
pub type TimestampNs = i64;

/// Index of a fixed-width time slice.
pub type TimeSliceId = i64;

/// A number of time slices.
pub type TimeSliceCount = i64;

/// A fractional number of time slices, used for averaged statistics.
pub type FractionalSliceCount = f64;

/// Width of one time slice (1 ms).
pub const NANOSECONDS_PER_SLICE: i64 = 1_000_000;

/// The slice whose window contains the given timestamp.
pub fn slice_containing_timestamp(timestamp: TimestampNs) -> TimeSliceId {
    timestamp.div_euclid(NANOSECONDS_PER_SLICE)
}

/// The first slice of a period starting at `start_timestamp`.
///
/// Rounds to the nearest slice boundary, ties going up.
pub fn slice_for_start_timestamp(start_timestamp: TimestampNs) -> TimeSliceId {
    let slice = slice_containing_timestamp(start_timestamp);
    if start_timestamp - slice * NANOSECONDS_PER_SLICE >= NANOSECONDS_PER_SLICE / 2 {
        slice + 1
    } else {
        slice
    }
}

/// The last slice of a period ending at `end_timestamp`.
///
/// Rounds to the nearest slice boundary, ties going down.
pub fn slice_for_end_timestamp(end_timestamp: TimestampNs) -> TimeSliceId {
    let slice = slice_containing_timestamp(end_timestamp);
    if end_timestamp - slice * NANOSECONDS_PER_SLICE < NANOSECONDS_PER_SLICE / 2 {
        slice - 1
    } else {
        slice
    }
}

/// First nanosecond covered by the given slice.
pub fn start_of_slice(slice: TimeSliceId) -> TimestampNs {
    slice * NANOSECONDS_PER_SLICE
}

/// Last nanosecond covered by the given slice.
pub fn end_of_slice(slice: TimeSliceId) -> TimestampNs {
    start_of_slice(slice + 1) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_timestamp_rounds_half_up() {
        assert_eq!(slice_for_start_timestamp(0), 0);
        assert_eq!(slice_for_start_timestamp(499_999), 0);
        assert_eq!(slice_for_start_timestamp(500_000), 1);
        assert_eq!(slice_for_start_timestamp(1_000_000), 1);
        assert_eq!(slice_for_start_timestamp(1_499_999), 1);
        assert_eq!(slice_for_start_timestamp(1_500_000), 2);
    }

    #[test]
    fn end_timestamp_rounds_half_down() {
        assert_eq!(slice_for_end_timestamp(499_999), -1);
        assert_eq!(slice_for_end_timestamp(500_000), 0);
        assert_eq!(slice_for_end_timestamp(999_999), 0);
        assert_eq!(slice_for_end_timestamp(1_499_999), 0);
        assert_eq!(slice_for_end_timestamp(1_500_000), 1);
    }

    #[test]
    fn short_periods_span_at_least_one_slice() {
        // A 1ns period in the middle of a slice still covers that slice.
        let start = slice_for_start_timestamp(250_000);
        let end = slice_for_end_timestamp(250_001);
        assert!(start <= end);
    }

    #[test]
    fn slice_boundaries_invert_conversion() {
        for slice in [0i64, 1, 17, 4096] {
            assert_eq!(slice_containing_timestamp(start_of_slice(slice)), slice);
            assert_eq!(slice_containing_timestamp(end_of_slice(slice)), slice);
        }
    }
}
