//! Dispatcher inspection: counts, validation, summaries and dumps

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use contracts::{DataCode, SeriesIssue, SourceId, TimeStamp};
use observability::metrics::record_validation_issue;

use crate::channel::ChannelHandle;
use crate::dispatch_data::{ChannelVisitor, Channelled, DispatchData};
use crate::dispatcher::Dispatcher;

/// Histogram of sample counts: time bin -> (code, source) -> samples
pub type TimeSummary = BTreeMap<TimeStamp, BTreeMap<(DataCode, SourceId), usize>>;

/// Data quality problem of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelIssue {
    pub code: DataCode,
    pub source: SourceId,
    pub issue: SeriesIssue,
}

/// One line of [`channel_summaries`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub code: String,
    pub source: String,
    pub priority: i32,
    pub samples: usize,
    pub first: Option<TimeStamp>,
    pub last: Option<TimeStamp>,
    pub subscribers: usize,
}

pub fn count_channels(dispatcher: &Dispatcher) -> usize {
    dispatcher.entries().count()
}

/// Total samples over every channel
pub fn count_values(dispatcher: &Dispatcher) -> usize {
    struct Counter(usize);

    impl ChannelVisitor for Counter {
        fn visit<T: Channelled>(
            &mut self,
            _code: DataCode,
            _source: &SourceId,
            _data: &DispatchData,
            channel: &ChannelHandle<T>,
        ) {
            self.0 += channel.len();
        }
    }

    let mut counter = Counter(0);
    dispatcher.visit_channels(&mut counter);
    counter.0
}

/// Check every channel with the rules of its value type.
///
/// Each problem is logged and counted; the returned list holds the first
/// problem per channel.
pub fn validate_dispatcher(dispatcher: &Dispatcher) -> Vec<ChannelIssue> {
    struct Validator(Vec<ChannelIssue>);

    impl ChannelVisitor for Validator {
        fn visit<T: Channelled>(
            &mut self,
            code: DataCode,
            source: &SourceId,
            _data: &DispatchData,
            channel: &ChannelHandle<T>,
        ) {
            let issue = T::series_issue(channel.read().series().as_slice());
            if let Some(issue) = issue {
                warn!(code = %code, source = %source, issue = %issue, "Invalid channel");
                record_validation_issue(code.short_name(), source);
                self.0.push(ChannelIssue {
                    code,
                    source: source.clone(),
                    issue,
                });
            }
        }
    }

    let mut validator = Validator(Vec::new());
    dispatcher.visit_channels(&mut validator);
    validator.0
}

pub fn is_valid(dispatcher: &Dispatcher) -> bool {
    validate_dispatcher(dispatcher).is_empty()
}

/// Count samples per `bin`-wide time bin and (code, source).
///
/// Bins are keyed by their start, a multiple of `bin` since the epoch.
/// Samples with undefined time are skipped.
pub fn summarize_over_time(dispatcher: &Dispatcher, bin: Duration) -> TimeSummary {
    struct Binner {
        bin: Duration,
        summary: TimeSummary,
    }

    impl ChannelVisitor for Binner {
        fn visit<T: Channelled>(
            &mut self,
            code: DataCode,
            source: &SourceId,
            _data: &DispatchData,
            channel: &ChannelHandle<T>,
        ) {
            let channel = channel.read();
            for sample in channel.series().iter().filter(|s| s.time.is_defined()) {
                *self
                    .summary
                    .entry(sample.time.floor_to(self.bin))
                    .or_default()
                    .entry((code, source.clone()))
                    .or_insert(0) += 1;
            }
        }
    }

    let mut binner = Binner {
        bin,
        summary: TimeSummary::new(),
    };
    dispatcher.visit_channels(&mut binner);
    binner.summary
}

pub fn channel_summaries(dispatcher: &Dispatcher) -> Vec<ChannelSummary> {
    dispatcher
        .entries()
        .map(|(code, source, data)| ChannelSummary {
            code: code.short_name().to_string(),
            source: source.to_string(),
            priority: dispatcher.source_priority(source),
            samples: data.len(),
            first: data.first_time(),
            last: data.last_time(),
            subscribers: data.subscriber_count(),
        })
        .collect()
}

/// Every sample as `{short name: {source: [[seconds, value], ...]}}`
pub fn to_json(dispatcher: &Dispatcher) -> serde_json::Value {
    let mut codes = serde_json::Map::new();
    for (code, source, data) in dispatcher.entries() {
        let samples: Vec<serde_json::Value> = data
            .to_json_samples()
            .into_iter()
            .map(|(time, value)| serde_json::json!([time.as_secs(), value]))
            .collect();
        let sources = codes
            .entry(code.short_name())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(sources) = sources {
            sources.insert(source.to_string(), serde_json::Value::Array(samples));
        }
    }
    serde_json::Value::Object(codes)
}

impl fmt::Display for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Dispatcher:")?;
        for (code, source, data) in self.entries() {
            writeln!(
                f,
                "  Channel of type {} named {} (prio: {}) with {} samples with {} listeners",
                code.short_name(),
                source,
                self.source_priority(source),
                data.len(),
                data.subscriber_count()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Angle, BinaryEdge, Velocity};

    fn ts(secs: f64) -> TimeStamp {
        TimeStamp::from_secs(secs)
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.set_source_priority("nmea", 2);
        for t in [0.5, 1.5, 2.5, 3.2] {
            d.publish_value(DataCode::Aws, "nmea", ts(t), Velocity::from_knots(t)).unwrap();
        }
        d.publish_value(DataCode::Awa, "log", ts(1.0), Angle::from_degrees(30.0)).unwrap();
        d
    }

    #[test]
    fn test_counts() {
        let d = dispatcher();
        assert_eq!(count_channels(&d), 2);
        assert_eq!(count_values(&d), 5);
        assert_eq!(count_values(&Dispatcher::new()), 0);
    }

    #[test]
    fn test_validate_out_of_order() {
        let mut d = dispatcher();
        assert!(is_valid(&d));

        d.insert_samples(
            DataCode::Tws,
            "bad",
            [
                contracts::Sample::new(ts(2.0), Velocity::from_knots(1.0)),
                contracts::Sample::new(ts(1.0), Velocity::from_knots(1.0)),
            ],
        )
        .unwrap();
        // insert_samples keeps the order it is given
        let issues = validate_dispatcher(&d);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, DataCode::Tws);
        assert!(matches!(issues[0].issue, SeriesIssue::OutOfOrder { index: 0, .. }));
        assert!(!is_valid(&d));
    }

    #[test]
    fn test_validate_binary_edges() {
        let mut d = Dispatcher::new();
        d.publish_value(DataCode::ValidGps, "gps", ts(1.0), BinaryEdge::ToOn).unwrap();
        d.publish_value(DataCode::ValidGps, "gps", ts(2.0), BinaryEdge::ToOff).unwrap();
        assert!(is_valid(&d));

        d.publish_value(DataCode::ValidGps, "gps", ts(3.0), BinaryEdge::ToOn).unwrap();
        let issues = validate_dispatcher(&d);
        assert_eq!(issues[0].issue, SeriesIssue::EdgeEndsOn { time: ts(3.0) });
    }

    #[test]
    fn test_validate_non_finite() {
        let mut d = Dispatcher::new();
        d.publish_value(DataCode::Aws, "a", ts(1.0), Velocity::from_knots(f64::NAN)).unwrap();
        assert_eq!(validate_dispatcher(&d)[0].issue, SeriesIssue::NonFinite { index: 0 });
    }

    #[test]
    fn test_summarize_over_time() {
        let d = dispatcher();
        let summary = summarize_over_time(&d, Duration::from_secs(2));
        let bins: Vec<TimeStamp> = summary.keys().copied().collect();
        assert_eq!(bins, vec![ts(0.0), ts(2.0)]);

        let aws = (DataCode::Aws, SourceId::new("nmea"));
        let awa = (DataCode::Awa, SourceId::new("log"));
        assert_eq!(summary[&ts(0.0)][&aws], 2);
        assert_eq!(summary[&ts(0.0)][&awa], 1);
        assert_eq!(summary[&ts(2.0)][&aws], 2);
        assert!(!summary[&ts(2.0)].contains_key(&awa));
    }

    #[test]
    fn test_display() {
        let d = dispatcher();
        let text = d.to_string();
        assert!(text.starts_with("\nDispatcher:\n"));
        assert!(text.contains("Channel of type aws named nmea (prio: 2) with 4 samples with 0 listeners"));
        assert!(text.contains("Channel of type awa named log (prio: 0) with 1 samples"));
    }

    #[test]
    fn test_to_json_and_summaries() {
        let d = dispatcher();
        let json = to_json(&d);
        let aws = json["aws"]["nmea"].as_array().unwrap();
        assert_eq!(aws.len(), 4);
        assert_eq!(aws[0][0].as_f64(), Some(0.5));

        let summaries = channel_summaries(&d);
        assert_eq!(summaries.len(), 2);
        let aws = summaries.iter().find(|s| s.code == "aws").unwrap();
        assert_eq!((aws.priority, aws.samples), (2, 4));
        assert_eq!(aws.last, Some(ts(3.2)));
        let encoded = serde_json::to_value(aws).unwrap();
        assert_eq!(encoded["source"], "nmea");
    }
}
