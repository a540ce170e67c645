//! Configuration management

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_RETRY_DELAY_MS, DEFAULT_CHANNEL_MAX_CONCURRENT,
    DEFAULT_CHANNEL_MAX_QUEUE_DEPTH, DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
    DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_MAX_RETRIES,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_STATUS_RETENTION,
    DEFAULT_WORKER_COUNT,
    DEFAULT_WORKER_JOIN_TIMEOUT_MS,
};
use crate::{Channel, FastBreakError, Result};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delivery: DeliveryConfig,
    pub retry: RetryConfig,
    pub channels: ChannelsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the delivery engine cannot run with
    ///
    /// # Errors
    /// Returns `FastBreakError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.worker_count == 0 {
            return Err(invalid("delivery.worker_count must be greater than 0"));
        }
        if self.delivery.poll_interval_ms == 0 {
            return Err(invalid("delivery.poll_interval_ms must be greater than 0"));
        }
        if self.delivery.queue_capacity == 0 {
            return Err(invalid("delivery.queue_capacity must be greater than 0"));
        }
        if self.delivery.status_retention == 0 {
            return Err(invalid("delivery.status_retention must be greater than 0"));
        }

        self.retry.validate()?;

        self.channels.default.validate("channels.default")?;
        for (channel, limits) in &self.channels.overrides {
            limits.validate(&format!("channels.overrides.{channel}"))?;
        }
        Ok(())
    }
}

/// Queue and worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub worker_join_timeout_ms: u64,
    /// Job-level re-enqueue cap, shared by every channel of a job
    pub max_retries: u32,
    /// Base of the queue's default `base * 2^retry_count` backoff
    pub base_retry_delay_ms: u64,
    pub queue_capacity: usize,
    /// Completed, terminal and cancelled jobs kept for status queries;
    /// the oldest is dropped first
    pub status_retention: usize,
}

impl DeliveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            worker_join_timeout_ms: DEFAULT_WORKER_JOIN_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            status_retention: DEFAULT_STATUS_RETENTION,
        }
    }
}

/// Backoff shape used for job re-enqueue delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid("retry.max_delay_ms must be >= retry.base_delay_ms"));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

/// Bulkhead and circuit breaker limits for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLimits {
    pub max_concurrent: usize,
    pub max_queue_depth: usize,
    /// How long a queued delivery may wait for a slot; unbounded when unset
    pub queue_timeout_ms: Option<u64>,
    pub failure_threshold: u32,
    pub open_timeout_ms: u64,
}

impl ChannelLimits {
    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    fn validate(&self, path: &str) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(invalid(format!("{path}.max_concurrent must be greater than 0")));
        }
        if self.failure_threshold == 0 {
            return Err(invalid(format!("{path}.failure_threshold must be greater than 0")));
        }
        if self.queue_timeout_ms == Some(0) {
            return Err(invalid(format!("{path}.queue_timeout_ms must be greater than 0")));
        }
        Ok(())
    }
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_CHANNEL_MAX_CONCURRENT,
            max_queue_depth: DEFAULT_CHANNEL_MAX_QUEUE_DEPTH,
            queue_timeout_ms: None,
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            open_timeout_ms: DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS,
        }
    }
}

/// Per-channel limits: a shared default plus optional overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub default: ChannelLimits,
    pub overrides: BTreeMap<Channel, ChannelLimits>,
}

impl ChannelsConfig {
    /// Limits in force for `channel`
    pub fn for_channel(&self, channel: Channel) -> &ChannelLimits {
        self.overrides.get(&channel).unwrap_or(&self.default)
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: DEFAULT_LOG_FILTER.to_string(), json: false }
    }
}

fn invalid(message: impl Into<String>) -> FastBreakError {
    FastBreakError::Config(message.into())
}
