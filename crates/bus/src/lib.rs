//! # Bus
//!
//! 进程内数据总线。
//!
//! 负责：
//! - 按 (数据码, 来源) 保存时间序列，发布时通知订阅者（可节流）
//! - 多来源按优先级合并为单一序列
//! - 派生 Dispatcher（过滤、浅拷贝、裁剪、合并映射）
//! - 按时间顺序回放记录数据，虚拟时钟定时器

pub mod channel;
pub mod compose;
pub mod dispatch_data;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod inspect;
pub mod lookup;
pub mod merge;
pub mod metrics;
pub mod priorities;
pub mod replay;

pub use contracts::{DataCode, Sample, SampleSeries, SourceId, TimeStamp, ValueKind};
pub use channel::{Channel, ChannelHandle, SubscriberFn, SubscriberId};
pub use compose::{
    copy_priorities, crop_dispatcher, filter_and_map_channels, filter_channels,
    list_data_codes_with_differences, merge_dispatch_data_maps,
    merge_dispatcher_with_dispatch_data_map, shallow_copy,
};
pub use dispatch_data::{ChannelVisitor, Channelled, DispatchData, TypedChannel};
pub use dispatcher::{DispatchDataMap, Dispatcher, ListenerId};
pub use error::DispatcherError;
pub use handle::QueuedSubscription;
pub use inspect::{
    channel_summaries, count_channels, count_values, is_valid, summarize_over_time, to_json,
    validate_dispatcher, ChannelIssue, ChannelSummary, TimeSummary,
};
pub use merge::{merge_all, merge_channels, merge_channels_with_outcome, merge_series, MergeOutcome};
pub use metrics::{MetricsSnapshot, SubscriberMetrics};
pub use priorities::SourcePriorities;
pub use replay::{ReplayDispatcher, TimeoutFn};
