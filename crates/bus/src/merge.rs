//! Multi-source merge
//!
//! Several channels of the same data code become one series. Samples are
//! consumed in time order across all sources; a sample closer than the merge
//! threshold to the last kept sample competes with it:
//! - equal priority: both are kept
//! - lower priority: the new sample is discarded
//! - higher priority: the kept sample is dropped and the comparison repeats
//!   against the sample before it

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use contracts::{DataCode, Sample, SampleSeries, SourceId, DEFAULT_PRIORITY};
use observability::metrics::record_merge;

use crate::channel::{Channel, ChannelHandle};
use crate::dispatch_data::{Channelled, DispatchData};
use crate::dispatcher::Dispatcher;
use crate::priorities::SourcePriorities;
use crate::with_value_type;

/// What a merge did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Number of source channels
    pub inputs: usize,
    /// Samples over all sources
    pub input_samples: usize,
    /// Samples in the merged series
    pub output_samples: usize,
    /// New samples rejected by a close, higher-priority kept sample
    pub discarded: usize,
    /// Kept samples replaced by a close, higher-priority new sample
    pub superseded: usize,
}

/// Cursor over one source's samples
struct PrioritizedView<'a, T> {
    priority: i32,
    samples: &'a [Sample<T>],
    cursor: usize,
}

impl<'a, T> PrioritizedView<'a, T> {
    fn front(&self) -> Option<&'a Sample<T>> {
        self.samples.get(self.cursor)
    }
}

struct PrioritizedSample<T> {
    priority: i32,
    sample: Sample<T>,
}

/// View whose front sample is strictly earliest; the first view wins ties.
fn earliest_index<T>(views: &[PrioritizedView<'_, T>]) -> Option<usize> {
    let mut best: Option<(usize, &Sample<T>)> = None;
    for (i, view) in views.iter().enumerate() {
        if let Some(front) = view.front() {
            if best.is_none_or(|(_, b)| front.time < b.time) {
                best = Some((i, front));
            }
        }
    }
    best.map(|(i, _)| i)
}

fn add_sample<T>(
    dst: &mut Vec<PrioritizedSample<T>>,
    x: PrioritizedSample<T>,
    threshold_secs: f64,
    outcome: &mut MergeOutcome,
) {
    while let Some(b) = dst.last() {
        if b.sample.time.abs_diff_secs(x.sample.time) >= threshold_secs {
            break;
        }
        match x.priority.cmp(&b.priority) {
            std::cmp::Ordering::Equal => break,
            std::cmp::Ordering::Less => {
                outcome.discarded += 1;
                return;
            }
            std::cmp::Ordering::Greater => {
                dst.pop();
                outcome.superseded += 1;
            }
        }
    }
    dst.push(x);
}

/// Merge prioritized sample slices into one series.
///
/// Inputs are stably sorted by priority, highest first, so among samples with
/// the same time the one from the higher-priority source is consumed first.
pub fn merge_series<T: Clone>(
    inputs: &[(i32, &[Sample<T>])],
    threshold: Duration,
) -> (SampleSeries<T>, MergeOutcome) {
    let mut views: Vec<PrioritizedView<'_, T>> = inputs
        .iter()
        .map(|&(priority, samples)| PrioritizedView {
            priority,
            samples,
            cursor: 0,
        })
        .collect();
    views.sort_by_key(|v| std::cmp::Reverse(v.priority));

    let mut outcome = MergeOutcome {
        inputs: views.len(),
        input_samples: views.iter().map(|v| v.samples.len()).sum(),
        ..MergeOutcome::default()
    };

    let threshold_secs = threshold.as_secs_f64();
    let mut dst = Vec::with_capacity(views.first().map_or(0, |v| v.samples.len()));
    while let Some(index) = earliest_index(&views) {
        let view = &mut views[index];
        let sample = view.samples[view.cursor].clone();
        view.cursor += 1;
        let x = PrioritizedSample {
            priority: view.priority,
            sample,
        };
        add_sample(&mut dst, x, threshold_secs, &mut outcome);
    }

    outcome.output_samples = dst.len();
    let series = dst.into_iter().map(|p| p.sample).collect::<Vec<_>>().into();
    (series, outcome)
}

fn merge_typed<T: Channelled>(
    code: DataCode,
    dst_source: &SourceId,
    priorities: &SourcePriorities,
    sources: &BTreeMap<SourceId, DispatchData>,
    threshold: Duration,
) -> (DispatchData, MergeOutcome) {
    let handles: Vec<(i32, &ChannelHandle<T>)> = sources
        .iter()
        .filter_map(|(source, data)| match data.channel::<T>() {
            Some(handle) => Some((priorities.get(source).unwrap_or(DEFAULT_PRIORITY), handle)),
            None => {
                warn!(code = %code, source = %source, "Skipping channel of unexpected type");
                None
            }
        })
        .collect();
    let guards: Vec<_> = handles.iter().map(|(p, h)| (*p, h.read())).collect();
    let inputs: Vec<(i32, &[Sample<T>])> = guards
        .iter()
        .map(|(p, g)| (*p, g.series().as_slice()))
        .collect();

    let (series, outcome) = merge_series(&inputs, threshold);
    let handle = ChannelHandle::new(Channel::with_series(code, dst_source.clone(), series));
    (
        DispatchData::from_typed(code, dst_source.clone(), handle),
        outcome,
    )
}

/// Merge every channel in `sources` into one.
///
/// `None` for no sources. A single source is returned as is (same channel).
/// Otherwise the result is a new channel named `dst_source`; the inputs are
/// not modified.
pub fn merge_channels(
    code: DataCode,
    dst_source: impl Into<SourceId>,
    priorities: &SourcePriorities,
    sources: &BTreeMap<SourceId, DispatchData>,
    threshold: Duration,
) -> Option<DispatchData> {
    merge_channels_with_outcome(code, dst_source, priorities, sources, threshold)
        .map(|(data, _)| data)
}

/// [`merge_channels`] also reporting what the merge did.
#[instrument(
    name = "merge_channels",
    skip(code, dst_source, priorities, sources),
    fields(code = %code, sources = sources.len())
)]
pub fn merge_channels_with_outcome(
    code: DataCode,
    dst_source: impl Into<SourceId>,
    priorities: &SourcePriorities,
    sources: &BTreeMap<SourceId, DispatchData>,
    threshold: Duration,
) -> Option<(DispatchData, MergeOutcome)> {
    match sources.len() {
        0 => None,
        1 => {
            let data = sources.values().next()?.clone();
            let len = data.len();
            let outcome = MergeOutcome {
                inputs: 1,
                input_samples: len,
                output_samples: len,
                ..MergeOutcome::default()
            };
            Some((data, outcome))
        }
        _ => {
            let dst_source = dst_source.into();
            let (data, outcome) = with_value_type!(code.kind(), T => {
                merge_typed::<T>(code, &dst_source, priorities, sources, threshold)
            });
            debug!(
                code = %code,
                inputs = outcome.inputs,
                input_samples = outcome.input_samples,
                output_samples = outcome.output_samples,
                discarded = outcome.discarded,
                superseded = outcome.superseded,
                "Merged channels"
            );
            record_merge(
                code.short_name(),
                outcome.input_samples,
                outcome.output_samples,
                outcome.discarded + outcome.superseded,
            );
            Some((data, outcome))
        }
    }
}

/// One merged channel per data code of `src`, each named `dst_source`.
///
/// Codes with a single source keep sharing that source's channel. The result
/// carries `src`'s priorities.
#[instrument(name = "merge_all", skip(src, dst_source))]
pub fn merge_all(src: &Dispatcher, dst_source: impl Into<SourceId>, threshold: Duration) -> Dispatcher {
    let dst_source = dst_source.into();
    let mut dst = src.empty_like();
    crate::compose::copy_priorities(src, &mut dst);

    let mut merged = 0usize;
    for (&code, sources) in src.all_sources() {
        let Some((data, outcome)) = merge_channels_with_outcome(
            code,
            dst_source.clone(),
            src.source_priorities(),
            sources,
            threshold,
        ) else {
            continue;
        };
        if outcome.inputs > 1 {
            merged += 1;
            dst.insert_owned(data);
        } else {
            dst.set_shared(code, dst_source.clone(), data.renamed(dst_source.clone()));
        }
    }

    info!(
        codes = dst.all_sources().len(),
        merged,
        source = %dst_source,
        "Merged dispatcher"
    );
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Angle, TimeStamp, Velocity};

    fn ts(secs: f64) -> TimeStamp {
        TimeStamp::from_secs(secs)
    }

    fn kn(v: f64) -> Velocity {
        Velocity::from_knots(v)
    }

    fn samples(points: &[(f64, f64)]) -> Vec<Sample<Velocity>> {
        points.iter().map(|&(t, v)| Sample::new(ts(t), kn(v))).collect()
    }

    fn times(series: &SampleSeries<Velocity>) -> Vec<f64> {
        series.iter().map(|s| s.time.as_secs()).collect()
    }

    fn sources(d: &Dispatcher, code: DataCode) -> &BTreeMap<SourceId, DispatchData> {
        d.all_sources().get(&code).unwrap()
    }

    #[test]
    fn test_merge_prefers_higher_priority_within_threshold() {
        let a = samples(&[(0.3, 13.0), (0.6, 14.0), (1233.0, 13.0)]);
        let b = samples(&[(0.4, 17.0)]);
        let (merged, outcome) =
            merge_series(&[(1, a.as_slice()), (2, b.as_slice())], Duration::from_secs(12));

        assert_eq!(times(&merged), vec![0.4, 1233.0]);
        assert_eq!(merged.as_slice()[0].value, kn(17.0));
        assert_eq!(merged.as_slice()[1].value, kn(13.0));
        assert_eq!(outcome.superseded, 1);
        assert_eq!(outcome.discarded, 1);
        assert_eq!(outcome.output_samples, 2);
    }

    #[test]
    fn test_merge_far_apart_is_union() {
        let a = samples(&[(0.0, 1.0), (1.0, 1.0), (2.0, 1.0)]);
        let b = samples(&[(0.5, 2.0), (1.5, 2.0)]);
        let (merged, outcome) =
            merge_series(&[(2, a.as_slice()), (1, b.as_slice())], Duration::from_millis(10));
        assert_eq!(times(&merged), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert!(merged.is_monotonic());
        assert_eq!(outcome.discarded + outcome.superseded, 0);
    }

    #[test]
    fn test_merge_dedup_close_samples() {
        let a = samples(&[(100.0, 1.0)]);
        let b = samples(&[(100.0005, 2.0)]);
        let (merged, _) =
            merge_series(&[(2, a.as_slice()), (1, b.as_slice())], Duration::from_millis(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.as_slice()[0].value, kn(1.0));

        // Same result when the low-priority sample comes first in time.
        let b = samples(&[(99.9995, 2.0)]);
        let (merged, _) =
            merge_series(&[(1, b.as_slice()), (2, a.as_slice())], Duration::from_millis(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.as_slice()[0].value, kn(1.0));
    }

    #[test]
    fn test_merge_equal_priority_keeps_both() {
        let a = samples(&[(100.0, 1.0)]);
        let b = samples(&[(100.0005, 2.0)]);
        let (merged, _) =
            merge_series(&[(0, b.as_slice()), (0, a.as_slice())], Duration::from_millis(10));
        assert_eq!(times(&merged), vec![100.0, 100.0005]);
    }

    #[test]
    fn test_merge_identical_times_higher_priority_first() {
        let a = samples(&[(5.0, 1.0)]);
        let b = samples(&[(5.0, 2.0)]);
        let (merged, outcome) =
            merge_series(&[(1, b.as_slice()), (3, a.as_slice())], Duration::from_millis(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.as_slice()[0].value, kn(1.0));
        assert_eq!(outcome.discarded, 1);
    }

    #[test]
    fn test_merge_channels_zero_and_one_source() {
        let mut d = Dispatcher::new();
        let empty = BTreeMap::new();
        assert!(merge_channels(
            DataCode::Aws,
            "merged",
            d.source_priorities(),
            &empty,
            Duration::from_secs(1)
        )
        .is_none());

        d.publish_value(DataCode::Aws, "only", ts(1.0), kn(1.0)).unwrap();
        let merged = merge_channels(
            DataCode::Aws,
            "merged",
            d.source_priorities(),
            sources(&d, DataCode::Aws),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(merged.ptr_eq(d.dispatch_data_for_source(DataCode::Aws, "only").unwrap()));
    }

    #[test]
    fn test_merge_channels_leaves_inputs_untouched() {
        let mut d = Dispatcher::new();
        d.set_source_priority("a", 2);
        d.set_source_priority("b", 1);
        for t in [0.0, 1.0, 2.0] {
            d.publish_value(DataCode::Awa, "a", ts(t), Angle::from_degrees(t)).unwrap();
            d.publish_value(DataCode::Awa, "b", ts(t + 0.001), Angle::from_degrees(-t))
                .unwrap();
        }

        let merged = merge_channels(
            DataCode::Awa,
            "merged",
            d.source_priorities(),
            sources(&d, DataCode::Awa),
            Duration::from_millis(10),
        )
        .unwrap();

        assert_eq!(merged.source().as_str(), "merged");
        assert_eq!(merged.len(), 3);
        let values = merged.channel::<Angle>().unwrap().snapshot();
        assert!(values.iter().all(|s| s.value.degrees() >= 0.0));
        assert_eq!(d.dispatch_data_for_source(DataCode::Awa, "a").unwrap().len(), 3);
        assert_eq!(d.dispatch_data_for_source(DataCode::Awa, "b").unwrap().len(), 3);
    }

    #[test]
    fn test_merge_all() {
        let mut d = Dispatcher::new();
        d.set_source_priority("a", 1);
        d.publish_value(DataCode::Aws, "a", ts(0.0), kn(1.0)).unwrap();
        d.publish_value(DataCode::Aws, "b", ts(0.001), kn(2.0)).unwrap();
        d.publish_value(DataCode::Awa, "b", ts(0.0), Angle::from_degrees(3.0)).unwrap();

        let merged = merge_all(&d, "merged", Duration::from_millis(10));
        assert_eq!(merged.sources_for_channel(DataCode::Aws).len(), 1);
        let aws = merged.values::<Velocity>(DataCode::Aws, "merged").unwrap();
        assert_eq!(aws.len(), 1);
        assert_eq!(aws.as_slice()[0].value, kn(1.0));
        assert!(merged.is_owned(DataCode::Aws, "merged"));

        let awa = merged.dispatch_data_for_source(DataCode::Awa, "merged").unwrap();
        assert!(awa.ptr_eq(d.dispatch_data_for_source(DataCode::Awa, "b").unwrap()));
        assert!(!merged.is_owned(DataCode::Awa, "merged"));
        assert_eq!(merged.source_priority("a"), 1);
    }

    #[test]
    fn test_merge_all_single_source_takes_merged_name() {
        let mut d = Dispatcher::new();
        d.publish_value(DataCode::Awa, "b", ts(0.0), Angle::from_degrees(3.0)).unwrap();

        let merged = merge_all(&d, "merged", Duration::from_millis(10));
        let awa = merged.dispatch_data_for_source(DataCode::Awa, "merged").unwrap();
        assert_eq!(awa.source().as_str(), "merged");
        assert!(awa.ptr_eq(d.dispatch_data_for_source(DataCode::Awa, "b").unwrap()));
        assert_eq!(merged.current_source(DataCode::Awa).map(|s| s.as_str()), Some("merged"));
        assert!(merged.to_string().contains("named merged"));
        assert_eq!(d.current_source(DataCode::Awa).map(|s| s.as_str()), Some("b"));
    }
}
