//! 总线指标收集模块
//!
//! `record_*` 函数写入全局 `metrics` recorder (未安装时为空操作)；
//! [`BusMetricsAggregator`] 在内存中汇总同样的事件，便于输出摘要。

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};

/// 记录一次样本发布
pub fn record_sample_published(code: &str, source: &str) {
    counter!(
        "anemobus_samples_published_total",
        "code" => code.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// 记录一次订阅者回调
pub fn record_subscriber_notified(code: &str) {
    counter!(
        "anemobus_subscriber_notifications_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// 记录队列订阅者因队列已满丢弃的样本
pub fn record_queue_drop(code: &str, dropped_total: u64) {
    counter!(
        "anemobus_queue_dropped_total",
        "code" => code.to_string()
    )
    .increment(1);
    gauge!(
        "anemobus_queue_dropped_current",
        "code" => code.to_string()
    )
    .set(dropped_total as f64);
}

/// 记录一次多源合并
///
/// `discarded` 为因优先级被丢弃或被替换的样本数。
pub fn record_merge(code: &str, input_samples: usize, output_samples: usize, discarded: usize) {
    counter!("anemobus_merges_total", "code" => code.to_string()).increment(1);
    histogram!("anemobus_merge_input_samples").record(input_samples as f64);
    histogram!("anemobus_merge_output_samples").record(output_samples as f64);
    if discarded > 0 {
        counter!(
            "anemobus_merge_discarded_total",
            "code" => code.to_string()
        )
        .increment(discarded as u64);
    }
}

/// 记录触发的定时器数量
pub fn record_timeouts_fired(count: usize) {
    if count > 0 {
        counter!("anemobus_timeouts_fired_total").increment(count as u64);
    }
}

/// 记录因虚拟时钟未设置而丢弃的定时器
pub fn record_timeout_dropped() {
    counter!("anemobus_timeouts_dropped_total").increment(1);
}

/// 记录校验发现的问题通道
pub fn record_validation_issue(code: &str, source: &str) {
    counter!(
        "anemobus_invalid_channels_total",
        "code" => code.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// 总线指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct BusMetricsAggregator {
    /// 发布样本总数
    pub total_published: u64,

    /// 各数据码发布样本数 (按短名)
    pub published_per_code: BTreeMap<String, u64>,

    /// 合并次数
    pub total_merges: u64,

    /// 合并中被丢弃的样本总数
    pub total_merge_discarded: u64,

    /// 合并输出长度统计
    pub merge_output_stats: RunningStats,

    /// 已触发定时器数
    pub timeouts_fired: u64,

    /// 被丢弃的定时器数
    pub timeouts_dropped: u64,

    /// 队列订阅者丢弃数
    pub queue_drops: u64,
}

impl BusMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_published(&mut self, code: &str) {
        self.total_published += 1;
        *self.published_per_code.entry(code.to_string()).or_insert(0) += 1;
    }

    pub fn on_merge(&mut self, output_samples: usize, discarded: usize) {
        self.total_merges += 1;
        self.total_merge_discarded += discarded as u64;
        self.merge_output_stats.push(output_samples as f64);
    }

    pub fn on_timeouts_fired(&mut self, count: usize) {
        self.timeouts_fired += count as u64;
    }

    pub fn on_timeout_dropped(&mut self) {
        self.timeouts_dropped += 1;
    }

    pub fn on_queue_drop(&mut self) {
        self.queue_drops += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let attempted = self.timeouts_fired + self.timeouts_dropped;
        MetricsSummary {
            total_published: self.total_published,
            total_merges: self.total_merges,
            total_merge_discarded: self.total_merge_discarded,
            timeouts_fired: self.timeouts_fired,
            timeouts_dropped: self.timeouts_dropped,
            timeout_drop_rate: if attempted > 0 {
                self.timeouts_dropped as f64 / attempted as f64 * 100.0
            } else {
                0.0
            },
            queue_drops: self.queue_drops,
            merge_output_len: StatsSummary::from(&self.merge_output_stats),
            published_per_code: self.published_per_code.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_published: u64,
    pub total_merges: u64,
    pub total_merge_discarded: u64,
    pub timeouts_fired: u64,
    pub timeouts_dropped: u64,
    pub timeout_drop_rate: f64,
    pub queue_drops: u64,
    pub merge_output_len: StatsSummary,
    pub published_per_code: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bus Metrics Summary ===")?;
        writeln!(f, "Published samples: {}", self.total_published)?;
        writeln!(
            f,
            "Merges: {} ({} samples discarded)",
            self.total_merges, self.total_merge_discarded
        )?;
        writeln!(f, "Merge output length: {}", self.merge_output_len)?;
        writeln!(
            f,
            "Timeouts: {} fired, {} dropped ({:.2}%)",
            self.timeouts_fired, self.timeouts_dropped, self.timeout_drop_rate
        )?;
        writeln!(f, "Queue drops: {}", self.queue_drops)?;

        if !self.published_per_code.is_empty() {
            writeln!(f, "Published per code:")?;
            for (code, count) in &self.published_per_code {
                writeln!(f, "  {}: {}", code, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 6.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 3);
        assert!((stats.mean() - 4.0).abs() < 1e-10);
        assert!((stats.min() - 2.0).abs() < 1e-10);
        assert!((stats.max() - 6.0).abs() < 1e-10);
        assert!((stats.variance() - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = BusMetricsAggregator::new();
        aggregator.on_published("aws");
        aggregator.on_published("aws");
        aggregator.on_published("awa");
        aggregator.on_merge(10, 3);
        aggregator.on_timeouts_fired(3);
        aggregator.on_timeout_dropped();

        assert_eq!(aggregator.total_published, 3);
        assert_eq!(aggregator.published_per_code.get("aws"), Some(&2));
        assert_eq!(aggregator.total_merge_discarded, 3);

        let summary = aggregator.summary();
        assert_eq!(summary.timeouts_fired, 3);
        assert!((summary.timeout_drop_rate - 25.0).abs() < 1e-10);

        aggregator.reset();
        assert_eq!(aggregator.total_published, 0);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = BusMetricsAggregator::new();
        aggregator.on_published("twdir");
        aggregator.on_merge(4, 0);

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Published samples: 1"));
        assert!(output.contains("twdir: 1"));
        assert!(output.contains("n=1"));
    }

    #[test]
    fn test_record_helpers_without_recorder() {
        // No global recorder installed: recording must be a no-op.
        record_sample_published("aws", "test");
        record_subscriber_notified("aws");
        record_queue_drop("aws", 1);
        record_merge("aws", 3, 2, 1);
        record_timeouts_fired(2);
        record_timeout_dropped();
        record_validation_issue("aws", "test");
    }
}
