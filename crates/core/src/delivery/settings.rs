//! Conversions from domain configuration into resilience settings

use fastbreak_common::resilience::{
    BulkheadConfig, CircuitBreakerConfig, ConfigResult, RetryPolicy,
};
use fastbreak_domain::{ChannelLimits, RetryConfig};

/// Backoff policy used for job re-enqueue delays
pub fn retry_policy(config: &RetryConfig) -> ConfigResult<RetryPolicy> {
    RetryPolicy::builder()
        .max_attempts(config.max_attempts)
        .base_delay(config.base_delay())
        .max_delay(config.max_delay())
        .backoff_multiplier(config.backoff_multiplier)
        .jitter(config.jitter)
        .build()
}

pub fn bulkhead_config(limits: &ChannelLimits) -> ConfigResult<BulkheadConfig> {
    let builder = BulkheadConfig::builder()
        .max_concurrent(limits.max_concurrent)
        .max_queue_depth(limits.max_queue_depth);
    match limits.queue_timeout() {
        Some(timeout) => builder.queue_timeout(timeout).build(),
        None => builder.build(),
    }
}

pub fn circuit_breaker_config(limits: &ChannelLimits) -> ConfigResult<CircuitBreakerConfig> {
    CircuitBreakerConfig::builder()
        .failure_threshold(limits.failure_threshold)
        .open_timeout(limits.open_timeout())
        .build()
}
