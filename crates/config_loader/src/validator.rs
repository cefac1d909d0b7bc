//! 配置校验模块
//!
//! 校验规则：
//! - merge_threshold_secs 为正数，且可表示为 Duration
//! - freshness_max_age_secs 为正数，且可表示为 Duration
//! - default_subscriber_queue > 0
//! - priorities 中的 source 名称非空

use std::time::Duration;

use contracts::{BusConfig, ContractError};

/// 校验 BusConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &BusConfig) -> Result<(), ContractError> {
    validate_merge_threshold(config)?;
    validate_freshness(config)?;
    validate_subscriber_queue(config)?;
    validate_priorities(config)?;
    Ok(())
}

/// 校验合并阈值
fn validate_merge_threshold(config: &BusConfig) -> Result<(), ContractError> {
    let threshold = config.merge_threshold_secs;
    if !is_positive_duration(threshold) {
        return Err(ContractError::config_validation(
            "merge_threshold_secs",
            format!("merge_threshold_secs must be a positive duration in seconds, got {threshold}"),
        ));
    }
    Ok(())
}

/// 校验数据新鲜度窗口
fn validate_freshness(config: &BusConfig) -> Result<(), ContractError> {
    let max_age = config.freshness_max_age_secs;
    if !is_positive_duration(max_age) {
        return Err(ContractError::config_validation(
            "freshness_max_age_secs",
            format!("freshness_max_age_secs must be a positive duration in seconds, got {max_age}"),
        ));
    }
    Ok(())
}

/// `secs > 0` and small enough for a `Duration`. Rejects NaN and infinities.
fn is_positive_duration(secs: f64) -> bool {
    secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// 校验订阅队列容量
fn validate_subscriber_queue(config: &BusConfig) -> Result<(), ContractError> {
    if config.default_subscriber_queue == 0 {
        return Err(ContractError::config_validation(
            "default_subscriber_queue",
            "default_subscriber_queue must be > 0",
        ));
    }
    Ok(())
}

/// 校验优先级表
fn validate_priorities(config: &BusConfig) -> Result<(), ContractError> {
    if config.priorities.keys().any(|source| source.trim().is_empty()) {
        return Err(ContractError::config_validation(
            "priorities",
            "source name cannot be empty",
        ));
    }
    Ok(())
}
