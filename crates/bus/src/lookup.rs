//! Nearest-sample lookups on a [`Dispatcher`]

use std::time::Duration;

use contracts::{DataCode, Sample, SourceId, TimeStamp};

use crate::dispatch_data::Channelled;
use crate::dispatcher::Dispatcher;

impl Dispatcher {
    /// Sample of (code, source) nearest to `time`, if closer than `max_delta`.
    ///
    /// `None` when the source is missing, has another value type, or `time`
    /// lies outside the span of its samples.
    pub fn value_from_source_at<T: Channelled>(
        &self,
        code: DataCode,
        source: &str,
        time: TimeStamp,
        max_delta: Duration,
    ) -> Option<Sample<T>> {
        let handle = self.dispatch_data_for_source(code, source)?.channel::<T>()?;
        let channel = handle.read();
        channel
            .series()
            .nearest(time)
            .filter(|s| s.time.abs_diff_secs(time) < max_delta.as_secs_f64())
            .cloned()
    }

    /// First hit of [`Dispatcher::value_from_source_at`] over `sources`, in order.
    pub fn value_from_sources_at<T, S>(
        &self,
        code: DataCode,
        sources: &[S],
        time: TimeStamp,
        max_delta: Duration,
    ) -> Option<Sample<T>>
    where
        T: Channelled,
        S: AsRef<str>,
    {
        sources
            .iter()
            .find_map(|source| self.value_from_source_at(code, source.as_ref(), time, max_delta))
    }

    /// Sources of `code` from highest to lowest priority; equal priorities
    /// keep source-name order.
    pub fn sources_by_priority(&self, code: DataCode) -> Vec<SourceId> {
        let mut sources = self.sources_for_channel(code);
        sources.sort_by_key(|source| std::cmp::Reverse(self.source_priority(source)));
        sources
    }

    /// Like [`Dispatcher::value_from_sources_at`] over every source of `code`,
    /// highest priority first.
    pub fn value_at_by_priority<T: Channelled>(
        &self,
        code: DataCode,
        time: TimeStamp,
        max_delta: Duration,
    ) -> Option<Sample<T>> {
        let sources = self.sources_by_priority(code);
        self.value_from_sources_at(code, sources.as_slice(), time, max_delta)
    }
}
