//! Bus configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Priority of a source that was never assigned one
pub const DEFAULT_PRIORITY: i32 = 0;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Top-level bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Two merged samples closer than this (seconds) describe the same instant
    #[serde(default = "default_merge_threshold_secs")]
    pub merge_threshold_secs: f64,

    /// A source whose last sample is older than this (seconds) loses its
    /// current-source status to any other publishing source
    #[serde(default = "default_freshness_max_age_secs")]
    pub freshness_max_age_secs: f64,

    /// Queue capacity for queued subscribers created without an explicit one
    #[serde(default = "default_subscriber_queue")]
    pub default_subscriber_queue: usize,

    /// Replay settings
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Source name -> priority (higher wins)
    #[serde(default)]
    pub priorities: BTreeMap<String, i32>,
}

fn default_merge_threshold_secs() -> f64 {
    12.0
}

fn default_freshness_max_age_secs() -> f64 {
    15.0
}

fn default_subscriber_queue() -> usize {
    256
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::V1,
            merge_threshold_secs: default_merge_threshold_secs(),
            freshness_max_age_secs: default_freshness_max_age_secs(),
            default_subscriber_queue: default_subscriber_queue(),
            replay: ReplayConfig::default(),
            priorities: BTreeMap::new(),
        }
    }
}

impl BusConfig {
    pub fn freshness_max_age(&self) -> Duration {
        secs_to_duration(self.freshness_max_age_secs)
    }

    pub fn merge_threshold(&self) -> Duration {
        secs_to_duration(self.merge_threshold_secs)
    }
}

/// Saturating conversion: negative and NaN give zero, values past
/// `Duration::MAX` give `Duration::MAX`.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Replay configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// How replayed samples interact with the virtual clock
    #[serde(default)]
    pub clock_mode: ClockMode,
}

/// Virtual clock policy during replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Replay never touches the clock; callers set it explicitly
    #[default]
    Manual,
    /// Each replayed sample moves the clock to its time and fires due timeouts
    FollowSamples,
}
