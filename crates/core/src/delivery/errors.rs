//! Delivery error taxonomy

use std::time::Duration;

use fastbreak_common::error::{CommonError, ErrorSeverity};
use fastbreak_common::impl_error_classification;
use fastbreak_common::resilience::ConfigError;
use fastbreak_domain::{Channel, FastBreakError, JobId};
use thiserror::Error;

/// Outcome of one channel attempt that did not deliver
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The channel may accept the notification on a later pass
    #[error("Transient {channel} failure: {message}")]
    Transient { channel: Channel, message: String },

    /// The channel will never accept this notification
    #[error("Permanent {channel} failure: {message}")]
    Permanent { channel: Channel, message: String },

    /// The channel's circuit is open; the adapter was not invoked
    #[error("Circuit open for {channel}, retry after {retry_after:?}")]
    CircuitOpen { channel: Channel, retry_after: Duration },

    /// The channel's bulkhead had no free slot and a full wait queue
    #[error("Bulkhead full for {channel}: {capacity} concurrent deliveries")]
    BulkheadFull { channel: Channel, capacity: usize },

    /// Waited too long for a bulkhead slot
    #[error("Timed out after {timeout:?} waiting for a {channel} delivery slot")]
    Timeout { channel: Channel, timeout: Duration },

    /// The job used its whole retry budget with channels still failing
    #[error("Retry budget exhausted for job {job_id} after {retries} retries: {channels:?} still failed")]
    RetryBudgetExhausted { job_id: JobId, retries: u32, channels: Vec<Channel> },

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl DeliveryError {
    pub fn transient(channel: Channel, message: impl Into<String>) -> Self {
        Self::Transient { channel, message: message.into() }
    }

    pub fn permanent(channel: Channel, message: impl Into<String>) -> Self {
        Self::Permanent { channel, message: message.into() }
    }

    /// Whether the failure came from a guard rather than from the adapter
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::BulkheadFull { .. } | Self::Timeout { .. })
    }
}

impl_error_classification!(DeliveryError, Common,
    Self::Transient { .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Permanent { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::CircuitOpen { retry_after, .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
        retry_after: Some(*retry_after),
    },
    Self::BulkheadFull { .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Timeout { .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::RetryBudgetExhausted { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);

/// Delivery queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Delivery queue is closed")]
    Closed,

    #[error("Delivery queue is full: {capacity} jobs")]
    Full { capacity: usize },

    #[error("Job {0} is already queued")]
    Duplicate(JobId),

    #[error("Job {0} is not in flight")]
    NotInFlight(JobId),

    #[error("Queue store error: {0}")]
    Store(#[from] FastBreakError),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_classification!(QueueError, Common,
    Self::Closed => {
        retryable: false,
        severity: ErrorSeverity::Info,
        critical: false,
    },
    Self::Full { .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Duplicate(_) | Self::NotInFlight(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::Store(_) => {
        retryable: true,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);

/// Errors surfaced by the orchestrator's caller API
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("Invalid notification request: {0}")]
    InvalidRequest(String),

    #[error("Invalid delivery configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] FastBreakError),
}

impl OrchestratorError {
    /// Whether the queue was closed underneath the caller
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Queue(QueueError::Closed))
    }
}
