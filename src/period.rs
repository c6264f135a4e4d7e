//! Interval algebra over time slices.
//!
//! A [`PeriodList`] is an immutable set of closed slice intervals, always kept
//! sorted with adjacent or overlapping intervals merged. The only non-trivial
//! operation is set difference, implemented as a single left-to-right sweep
//! over both lists.

use crate::timeslice::{
    slice_for_end_timestamp, slice_for_start_timestamp, TimeSliceCount, TimeSliceId, TimestampNs,
};

/// A closed interval of time slices, `first..=last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub first: TimeSliceId,
    pub last: TimeSliceId,
}

impl Period {
    pub fn new(first: TimeSliceId, last: TimeSliceId) -> Self {
        Period { first, last }
    }

    /// Discretizes a closed timestamp interval to its covered slices.
    pub fn from_timestamps(start: TimestampNs, end: TimestampNs) -> Self {
        Period {
            first: slice_for_start_timestamp(start),
            last: slice_for_end_timestamp(end),
        }
    }

    pub fn contains(&self, slice: TimeSliceId) -> bool {
        self.first <= slice && slice <= self.last
    }

    pub fn len(&self) -> TimeSliceCount {
        (self.last - self.first + 1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

/// A sorted, merged, disjoint set of slice intervals.
///
/// Invariant: for consecutive periods `p`, `q`: `p.last + 1 < q.first`, i.e.
/// no two stored periods overlap or touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodList {
    periods: Vec<Period>,
}

impl PeriodList {
    /// Builds a list from arbitrary periods, sorting and merging them.
    /// Empty periods (`last < first`) are dropped.
    pub fn new(mut periods: Vec<Period>) -> Self {
        periods.retain(|p| !p.is_empty());
        if periods.is_empty() {
            return PeriodList::default();
        }

        periods.sort_by_key(|p| p.first);
        let mut merged: Vec<Period> = Vec::with_capacity(periods.len());
        let mut current = periods[0];
        for &p in &periods[1..] {
            if p.first <= current.last + 1 {
                current.last = current.last.max(p.last);
            } else {
                merged.push(current);
                current = p;
            }
        }
        merged.push(current);

        PeriodList { periods: merged }
    }

    pub fn empty() -> Self {
        PeriodList::default()
    }

    pub fn from_period(period: Period) -> Self {
        PeriodList::new(vec![period])
    }

    /// Discretizes a list of closed timestamp intervals to slice space.
    pub fn from_timestamp_periods(periods: &[(TimestampNs, TimestampNs)]) -> Self {
        PeriodList::new(
            periods
                .iter()
                .map(|&(start, end)| Period::from_timestamps(start, end))
                .collect(),
        )
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Total number of slices covered.
    pub fn total_slices(&self) -> TimeSliceCount {
        self.periods.iter().map(Period::len).sum()
    }

    pub fn contains(&self, slice: TimeSliceId) -> bool {
        self.periods
            .binary_search_by(|p| {
                if p.last < slice {
                    std::cmp::Ordering::Less
                } else if p.first > slice {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Set difference: the slices of `self` not covered by `other`.
    ///
    /// Single sweep over both lists; the result maintains the sorted/merged
    /// invariant by construction.
    pub fn minus(&self, other: &PeriodList) -> PeriodList {
        if other.periods.is_empty() || self.periods.is_empty() {
            return self.clone();
        }

        let mut result = Vec::new();
        let mut other_iter = other.periods.iter();
        let mut current_other = *other_iter.next().unwrap();

        for period in &self.periods {
            let mut start = period.first;
            while start <= period.last {
                // Advance to the first subtrahend ending at or after `start`.
                while current_other.last < start {
                    match other_iter.next() {
                        Some(&next) => current_other = next,
                        None => break,
                    }
                }

                if current_other.last < start || current_other.first > period.last {
                    // No overlap with the remainder of this period.
                    result.push(Period::new(start, period.last));
                    break;
                } else if current_other.first <= start {
                    // Overlap covers the start; skip past it.
                    start = current_other.last + 1;
                } else {
                    // Overlap begins later; keep the uncovered prefix.
                    result.push(Period::new(start, current_other.first - 1));
                    start = current_other.last + 1;
                }
            }
        }

        // Sweep output is already sorted and disjoint.
        PeriodList { periods: result }
    }

    /// Per-slice activity iterator over `start..=end`.
    pub fn active_iterator(&self, start: TimeSliceId, end: TimeSliceId) -> SliceActiveIterator<'_> {
        SliceActiveIterator::new(self, start, end)
    }
}

/// Streams one `bool` per slice of a query range, true when the slice is
/// covered by the underlying [`PeriodList`].
///
/// Walks the merged interval list exactly once, so a full pass over the range
/// is O(slices + periods).
pub struct SliceActiveIterator<'a> {
    periods: std::slice::Iter<'a, Period>,
    current: Option<Period>,
    next_slice: TimeSliceId,
    end_slice: TimeSliceId,
}

impl<'a> SliceActiveIterator<'a> {
    pub fn new(list: &'a PeriodList, start: TimeSliceId, end: TimeSliceId) -> Self {
        let mut periods = list.periods().iter();
        let mut current = periods.next().copied();
        while let Some(p) = current {
            if p.last >= start {
                break;
            }
            current = periods.next().copied();
        }
        SliceActiveIterator {
            periods,
            current,
            next_slice: start,
            end_slice: end,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next_slice <= self.end_slice
    }

    /// Consumes one slice and reports whether it is covered.
    pub fn next_is_active(&mut self) -> bool {
        let slice = self.next_slice;
        self.next_slice += 1;
        match self.current {
            Some(p) if p.contains(slice) => {
                if p.last < self.next_slice {
                    self.current = self.periods.next().copied();
                }
                true
            }
            _ => false,
        }
    }
}

impl Iterator for SliceActiveIterator<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.has_next() {
            Some(self.next_is_active())
        } else {
            None
        }
    }
}
