//! Rate observations for consumable metrics.
//!
//! Usage of a consumable metric is recorded as variable-length observation
//! periods: `timestamps` holds N+1 period boundaries and `rates` holds one
//! rate value per period. Slice-level samples are derived downstream, never
//! stored here.

use crate::timeslice::{
    slice_for_end_timestamp, slice_for_start_timestamp, TimeSliceCount, TimeSliceId, TimestampNs,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObservationError {
    #[error("expected {expected} period boundaries for {rates} rates, got {actual}")]
    BoundaryCountMismatch {
        expected: usize,
        actual: usize,
        rates: usize,
    },
    #[error("observation timestamps must be non-decreasing (index {index})")]
    UnorderedTimestamps { index: usize },
    #[error("observation period at index {index} is shorter than one time slice")]
    PeriodTooShort { index: usize },
}

/// An immutable series of rate observation periods.
#[derive(Debug, Clone)]
pub struct RateObservations {
    timestamps: Vec<TimestampNs>,
    rates: Vec<f64>,
}

impl RateObservations {
    /// Builds a series from N+1 period boundary timestamps and N rates.
    ///
    /// Period `i` covers `(timestamps[i], timestamps[i + 1]]`; every period
    /// must span at least one time slice.
    pub fn new(timestamps: Vec<TimestampNs>, rates: Vec<f64>) -> Result<Self, ObservationError> {
        if timestamps.is_empty() && rates.is_empty() {
            return Ok(RateObservations {
                timestamps: vec![0],
                rates,
            });
        }
        if timestamps.len() != rates.len() + 1 {
            return Err(ObservationError::BoundaryCountMismatch {
                expected: rates.len() + 1,
                actual: timestamps.len(),
                rates: rates.len(),
            });
        }
        for i in 0..timestamps.len() - 1 {
            if timestamps[i] > timestamps[i + 1] {
                return Err(ObservationError::UnorderedTimestamps { index: i });
            }
            let first = slice_for_start_timestamp(timestamps[i] + 1);
            let last = slice_for_end_timestamp(timestamps[i + 1]);
            if first > last {
                return Err(ObservationError::PeriodTooShort { index: i });
            }
        }
        Ok(RateObservations { timestamps, rates })
    }

    /// An empty series with no observation periods.
    pub fn none() -> Self {
        RateObservations {
            timestamps: vec![0],
            rates: Vec::new(),
        }
    }

    pub fn num_observations(&self) -> usize {
        self.rates.len()
    }

    pub fn earliest_timestamp(&self) -> TimestampNs {
        self.timestamps[0] + 1
    }

    pub fn latest_timestamp(&self) -> TimestampNs {
        *self.timestamps.last().unwrap()
    }

    /// First slice covered by any observation.
    pub fn first_slice(&self) -> TimeSliceId {
        slice_for_start_timestamp(self.earliest_timestamp())
    }

    /// Last slice covered by any observation.
    pub fn last_slice(&self) -> TimeSliceId {
        slice_for_end_timestamp(self.latest_timestamp())
    }

    /// Streams all observation periods in order.
    pub fn period_iterator(&self) -> ObservationPeriodIterator<'_> {
        ObservationPeriodIterator {
            observations: self,
            next_index: 0,
        }
    }
}

/// One observation period, resolved to slice space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationPeriod {
    pub start_timestamp: TimestampNs,
    pub end_timestamp: TimestampNs,
    pub first_slice: TimeSliceId,
    pub last_slice: TimeSliceId,
    pub rate: f64,
}

impl ObservationPeriod {
    pub fn slice_count(&self) -> TimeSliceCount {
        self.last_slice - self.first_slice + 1
    }
}

/// Pull iterator over the observation periods of a [`RateObservations`].
pub struct ObservationPeriodIterator<'a> {
    observations: &'a RateObservations,
    next_index: usize,
}

impl Iterator for ObservationPeriodIterator<'_> {
    type Item = ObservationPeriod;

    fn next(&mut self) -> Option<ObservationPeriod> {
        if self.next_index >= self.observations.rates.len() {
            return None;
        }
        let i = self.next_index;
        self.next_index += 1;
        let start_timestamp = self.observations.timestamps[i] + 1;
        let end_timestamp = self.observations.timestamps[i + 1];
        Some(ObservationPeriod {
            start_timestamp,
            end_timestamp,
            first_slice: slice_for_start_timestamp(start_timestamp),
            last_slice: slice_for_end_timestamp(end_timestamp),
            rate: self.observations.rates[i],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeslice::NANOSECONDS_PER_SLICE;

    fn ms(n: i64) -> TimestampNs {
        n * NANOSECONDS_PER_SLICE
    }

    #[test]
    fn empty_series_yields_no_periods() {
        let obs = RateObservations::new(vec![], vec![]).unwrap();
        assert_eq!(obs.num_observations(), 0);
        assert_eq!(obs.period_iterator().count(), 0);
    }

    #[test]
    fn periods_resolve_to_slices() {
        let obs = RateObservations::new(vec![ms(0), ms(2), ms(5)], vec![1.5, 3.0]).unwrap();
        let periods: Vec<_> = obs.period_iterator().collect();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].first_slice, 0);
        assert_eq!(periods[0].last_slice, 1);
        assert_eq!(periods[0].rate, 1.5);
        assert_eq!(periods[1].first_slice, 2);
        assert_eq!(periods[1].last_slice, 4);
        assert_eq!(periods[1].slice_count(), 3);
        assert_eq!(obs.first_slice(), 0);
        assert_eq!(obs.last_slice(), 4);
    }

    #[test]
    fn rejects_unordered_timestamps() {
        let err = RateObservations::new(vec![ms(0), ms(5), ms(2)], vec![1.0, 1.0]);
        assert!(matches!(err, Err(ObservationError::UnorderedTimestamps { .. })));
    }

    #[test]
    fn rejects_subslice_periods() {
        let err = RateObservations::new(vec![0, 1], vec![1.0]);
        assert!(matches!(err, Err(ObservationError::PeriodTooShort { .. })));
    }

    #[test]
    fn rejects_boundary_count_mismatch() {
        let err = RateObservations::new(vec![ms(0)], vec![1.0]);
        assert!(matches!(
            err,
            Err(ObservationError::BoundaryCountMismatch { .. })
        ));
    }
}
