//! Application constants
//!
//! Centralized location for the domain-level defaults used by configuration
//! and the delivery engine.

// Delivery worker defaults
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_WORKER_JOIN_TIMEOUT_MS: u64 = 5_000;

// Job-level retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
/// Finished jobs whose status stays queryable
pub const DEFAULT_STATUS_RETENTION: usize = 10_000;

// Backoff shape
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// Per-channel guards
pub const DEFAULT_CHANNEL_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_CHANNEL_MAX_QUEUE_DEPTH: usize = 100;
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS: u64 = 60_000;

// Logging
pub const DEFAULT_LOG_FILTER: &str = "fastbreak=info";

/// Prefix shared by every configuration environment variable
pub const ENV_PREFIX: &str = "FASTBREAK_";
