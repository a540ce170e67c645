//! Error types shared by the resilience primitives

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Rejected retry, breaker or bulkhead settings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Rejected resilience settings: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Outcome of a guarded call that did not succeed.
///
/// Either a layer refused to run the operation (open circuit, full bulkhead,
/// queue timeout) or the operation ran and returned `E`, which is kept
/// intact in `OperationFailed`.
///
/// `Display` and `Error` are written out by hand: `RetriesExhausted` boxes
/// the enum itself, which the derive cannot bound.
#[derive(Debug)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    CircuitOpen { retry_after: Duration },

    /// A queued call waited longer than the bulkhead queue timeout
    Timeout { timeout: Duration },

    /// Every slot is busy and the wait queue is full
    BulkheadFull { capacity: usize },

    OperationFailed { source: E },

    /// A retry layer gave up; `last` is the error of the final attempt
    RetriesExhausted { attempts: u32, last: Box<ResilienceError<E>> },

    InvalidConfiguration { message: String },
}

impl<E> fmt::Display for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { retry_after } => {
                write!(f, "Circuit open; next probe in {retry_after:?}")
            }
            Self::Timeout { timeout } => {
                write!(f, "Gave up waiting for a bulkhead slot after {timeout:?}")
            }
            Self::BulkheadFull { capacity } => {
                write!(f, "Bulkhead full: {capacity} calls already in flight")
            }
            Self::OperationFailed { source } => fmt::Display::fmt(source, f),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "Retries exhausted after {attempts} attempts: ")?;
                fmt::Display::fmt(last.as_ref(), f)
            }
            Self::InvalidConfiguration { message } => {
                write!(f, "Rejected resilience settings: {message}")
            }
        }
    }
}

impl<E> std::error::Error for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OperationFailed { source } => Some(source),
            Self::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The underlying operation error, if this failure came from the operation
    /// itself rather than from a resilience layer.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            Self::RetriesExhausted { last, .. } => last.operation_error(),
            _ => None,
        }
    }

    /// Consume the error, returning the operation error if there is one
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            Self::RetriesExhausted { last, .. } => last.into_operation_error(),
            _ => None,
        }
    }

    /// Whether this error was produced by a rejection (open circuit, full
    /// bulkhead, queue timeout) without the operation running.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::BulkheadFull { .. } | Self::Timeout { .. })
    }
}

impl<E> From<ConfigError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { message } => Self::InvalidConfiguration { message },
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::BulkheadFull { .. } => true,
            Self::OperationFailed { source } => source.is_retryable(),
            Self::RetriesExhausted { .. } | Self::InvalidConfiguration { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::BulkheadFull { .. } => {
                ErrorSeverity::Warning
            }
            Self::OperationFailed { source } => source.severity(),
            Self::RetriesExhausted { .. } | Self::InvalidConfiguration { .. } => {
                ErrorSeverity::Error
            }
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::OperationFailed { source } => source.is_critical(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } => Some(*retry_after),
            Self::OperationFailed { source } => source.retry_after(),
            _ => None,
        }
    }
}
