//! Sample / SampleSeries - timestamped values and their history.

use serde::{Deserialize, Serialize};
use std::slice;
use thiserror::Error;

use crate::{Quantity, TimeStamp};

/// One measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<T> {
    /// Source-reported time
    pub time: TimeStamp,
    pub value: T,
}

impl<T> Sample<T> {
    #[inline]
    pub fn new(time: TimeStamp, value: T) -> Self {
        Self { time, value }
    }
}

/// Append-only history of one (quantity, source) pair.
///
/// The series never reorders what was appended. Producers are expected to
/// publish in time order; the series records out-of-order appends as they are
/// and leaves detection to [`check_series`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries<T> {
    samples: Vec<Sample<T>>,
}

impl<T> Default for SampleSeries<T> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
        }
    }
}

impl<T> SampleSeries<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Build a series from samples in any order (stable sort by time).
    pub fn from_samples(mut samples: Vec<Sample<T>>) -> Self {
        samples.sort_by(|a, b| a.time.cmp(&b.time));
        Self { samples }
    }

    /// Append one sample.
    ///
    /// Returns false when the sample is earlier than the current last one.
    /// The sample is stored either way.
    #[inline]
    pub fn push(&mut self, sample: Sample<T>) -> bool {
        let in_order = self.samples.last().is_none_or(|last| last.time <= sample.time);
        self.samples.push(sample);
        in_order
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Sample<T>] {
        &self.samples
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Sample<T>> {
        self.samples.iter()
    }

    #[inline]
    pub fn first(&self) -> Option<&Sample<T>> {
        self.samples.first()
    }

    #[inline]
    pub fn last(&self) -> Option<&Sample<T>> {
        self.samples.last()
    }

    /// Keep only the first `len` samples.
    pub fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    /// Whether timestamps never decrease
    pub fn is_monotonic(&self) -> bool {
        self.samples.windows(2).all(|w| w[0].time <= w[1].time)
    }

    /// Sample closest to `time`.
    ///
    /// `None` for an empty series or when `time` lies outside
    /// `[first.time, last.time]`. On an exact tie between the two neighbours
    /// the later sample wins.
    pub fn nearest(&self, time: TimeStamp) -> Option<&Sample<T>> {
        let (first, last) = (self.samples.first()?, self.samples.last()?);
        if time < first.time || time > last.time {
            return None;
        }
        let idx = self.samples.partition_point(|s| s.time < time);
        let at = self.samples.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.samples.get(i));
        match (before, at) {
            (Some(b), Some(a)) if b.time.abs_diff_secs(time) < a.time.abs_diff_secs(time) => Some(b),
            (_, Some(a)) => Some(a),
            (b, None) => b,
        }
    }

    pub fn into_vec(self) -> Vec<Sample<T>> {
        self.samples
    }
}

impl<T: Clone> SampleSeries<T> {
    /// Copy of the samples with `from <= time <= to`; `None` bounds are open.
    pub fn crop(&self, from: Option<TimeStamp>, to: Option<TimeStamp>) -> Self {
        let samples = self
            .samples
            .iter()
            .filter(|s| from.is_none_or(|f| f <= s.time) && to.is_none_or(|t| s.time <= t))
            .cloned()
            .collect();
        Self { samples }
    }
}

impl<T> Extend<Sample<T>> for SampleSeries<T> {
    fn extend<I: IntoIterator<Item = Sample<T>>>(&mut self, iter: I) {
        self.samples.extend(iter);
    }
}

impl<T> From<Vec<Sample<T>>> for SampleSeries<T> {
    /// Takes the samples as they are, without sorting.
    fn from(samples: Vec<Sample<T>>) -> Self {
        Self { samples }
    }
}

impl<'a, T> IntoIterator for &'a SampleSeries<T> {
    type Item = &'a Sample<T>;
    type IntoIter = slice::Iter<'a, Sample<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Data quality problem found by the channel validator
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SeriesIssue {
    #[error("sample {index} is not finite")]
    NonFinite { index: usize },

    #[error("sample {index} has undefined time")]
    UndefinedTime { index: usize },

    #[error("time stamp of sample {index} ({time}) does not precede that of its successor ({next})")]
    OutOfOrder {
        index: usize,
        time: TimeStamp,
        next: TimeStamp,
    },

    #[error("first binary edge is ToOff at time {time}")]
    EdgeStartsOff { time: TimeStamp },

    #[error("last binary edge is ToOn at time {time}")]
    EdgeEndsOn { time: TimeStamp },

    #[error("two consecutive equal binary edges at sample {index} (time {time})")]
    RepeatedEdge { index: usize, time: TimeStamp },
}

/// First issue in a series of finite-checkable values.
///
/// Checks, per sample in order: finiteness, defined time, and that the time
/// does not exceed the next defined time.
pub fn check_series<T: Quantity>(samples: &[Sample<T>]) -> Option<SeriesIssue> {
    for (index, sample) in samples.iter().enumerate() {
        if !sample.value.is_finite() {
            return Some(SeriesIssue::NonFinite { index });
        }
        if !sample.time.is_defined() {
            return Some(SeriesIssue::UndefinedTime { index });
        }
        if let Some(next) = samples.get(index + 1) {
            if next.time.is_defined() && sample.time > next.time {
                return Some(SeriesIssue::OutOfOrder {
                    index,
                    time: sample.time,
                    next: next.time,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Velocity;

    fn ts(secs: f64) -> TimeStamp {
        TimeStamp::from_secs(secs)
    }

    fn series(times: &[f64]) -> SampleSeries<Velocity> {
        times
            .iter()
            .enumerate()
            .map(|(i, &t)| Sample::new(ts(t), Velocity::from_knots(i as f64)))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_push_reports_order() {
        let mut s = SampleSeries::new();
        assert!(s.push(Sample::new(ts(1.0), Velocity::from_knots(1.0))));
        assert!(s.push(Sample::new(ts(1.0), Velocity::from_knots(2.0))));
        assert!(!s.push(Sample::new(ts(0.5), Velocity::from_knots(3.0))));
        assert_eq!(s.len(), 3);
        assert!(!s.is_monotonic());
    }

    #[test]
    fn test_from_samples_is_stable() {
        let s = SampleSeries::from_samples(vec![
            Sample::new(ts(2.0), 1),
            Sample::new(ts(1.0), 2),
            Sample::new(ts(2.0), 3),
        ]);
        let values: Vec<i32> = s.iter().map(|x| x.value).collect();
        assert_eq!(values, vec![2, 1, 3]);
    }

    #[test]
    fn test_nearest() {
        let s = series(&[1.0, 2.0, 4.0]);
        assert_eq!(s.nearest(ts(2.9)).unwrap().time, ts(2.0));
        assert_eq!(s.nearest(ts(3.1)).unwrap().time, ts(4.0));
        assert_eq!(s.nearest(ts(1.0)).unwrap().time, ts(1.0));
        assert_eq!(s.nearest(ts(4.0)).unwrap().time, ts(4.0));
        assert!(s.nearest(ts(0.5)).is_none());
        assert!(s.nearest(ts(4.5)).is_none());
        assert!(SampleSeries::<Velocity>::new().nearest(ts(1.0)).is_none());
    }

    #[test]
    fn test_crop() {
        let s = series(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.crop(Some(ts(2.0)), Some(ts(3.0))).len(), 2);
        assert_eq!(s.crop(None, Some(ts(1.5))).len(), 1);
        assert_eq!(s.crop(Some(ts(3.5)), None).len(), 1);
    }

    #[test]
    fn test_check_series() {
        assert_eq!(check_series(series(&[1.0, 2.0, 2.0]).as_slice()), None);

        let out_of_order = series(&[1.0, 3.0, 2.0]);
        assert_eq!(
            check_series(out_of_order.as_slice()),
            Some(SeriesIssue::OutOfOrder {
                index: 1,
                time: ts(3.0),
                next: ts(2.0)
            })
        );

        let nan = vec![Sample::new(ts(1.0), Velocity::from_knots(f64::NAN))];
        assert_eq!(check_series(&nan), Some(SeriesIssue::NonFinite { index: 0 }));

        let undefined = vec![
            Sample::new(ts(1.0), Velocity::from_knots(1.0)),
            Sample::new(TimeStamp::UNDEFINED, Velocity::from_knots(1.0)),
        ];
        assert_eq!(
            check_series(&undefined),
            Some(SeriesIssue::UndefinedTime { index: 1 })
        );
    }
}
