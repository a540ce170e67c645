//! Shared error vocabulary for the FastBreak crates
//!
//! [`CommonError`] holds the failures every layer runs into: timeouts,
//! unavailable backends, bad configuration, storage and serialization
//! problems. Crate-level error enums wrap it in a `Common` variant instead of
//! redefining those cases:
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum QueueError {
//!     #[error("Queue is closed")]
//!     Closed,
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_classification!(QueueError, Common,
//!     Self::Closed => {
//!         retryable: false,
//!         severity: ErrorSeverity::Info,
//!         critical: false,
//!     }
//! );
//! ```
//!
//! [`ErrorClassification`] is what the retry executor asks before it tries
//! an operation again. [`ErrorSeverity`] picks the log level.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type CommonResult<T> = Result<T, CommonError>;

/// Failures shared across crates
#[derive(Debug, Clone, Error)]
pub enum CommonError {
    #[error("Configuration error{}: {message}", scope(.field))]
    Config { message: String, field: Option<String> },

    /// A lock or single-writer resource is held elsewhere
    #[error("Resource '{resource}' is locked")]
    Lock { resource: String },

    /// A breaker rejected the call; `retry_after` is when it half-opens
    #[error("Circuit open for '{resource}', retry in {retry_after:?}")]
    CircuitOpen { resource: String, retry_after: Duration },

    #[error("{format} serialization failed: {message}")]
    Serialization { format: &'static str, message: String },

    /// File or store I/O
    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    #[error("'{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A downstream service (SMTP relay, push gateway, webhook target) failed
    #[error("Backend '{service}' failed: {message}")]
    Backend { service: String, message: String, retryable: bool },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{kind} not found: '{id}'")]
    NotFound { kind: String, id: String },

    /// Broken invariant
    #[error("Internal error{}: {message}", scope(.context))]
    Internal { message: String, context: Option<String> },

    #[error("'{task}' cancelled: {reason}")]
    Cancelled { task: String, reason: String },
}

fn scope(label: &Option<String>) -> String {
    label.as_deref().map(|label| format!(" in '{label}'")).unwrap_or_default()
}

impl CommonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Configuration error pinned to one setting, e.g. `channels.email.max_concurrent`
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    pub fn lock(resource: impl Into<String>) -> Self {
        Self::Lock { resource: resource.into() }
    }

    pub fn circuit_open(resource: impl Into<String>, retry_after: Duration) -> Self {
        Self::CircuitOpen { resource: resource.into(), retry_after }
    }

    pub fn serialization(format: &'static str, message: impl Into<String>) -> Self {
        Self::Serialization { format, message: message.into() }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { operation: operation.into(), after }
    }

    pub fn backend(service: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend { service: service.into(), message: message.into(), retryable }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound { kind: kind.into(), id: id.to_string() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), context: None }
    }

    /// Internal error tagged with the component that detected it
    pub fn internal_in(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), context: Some(context.into()) }
    }

    pub fn cancelled(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled { task: task.into(), reason: reason.into() }
    }

    /// Short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Lock { .. } => "lock",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Serialization { .. } => "serialization",
            Self::Persistence { .. } => "persistence",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Lock { .. } | Self::CircuitOpen { .. } | Self::Timeout { .. } => true,
            Self::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } | Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::Lock { .. } | Self::CircuitOpen { .. } | Self::Timeout { .. } => {
                ErrorSeverity::Warning
            }
            Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Config { .. }
            | Self::Serialization { .. }
            | Self::Persistence { .. }
            | Self::Backend { .. }
            | Self::Validation { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Classification every FastBreak error type exposes
///
/// The `Classified` retry condition calls [`is_retryable`] and honours
/// [`retry_after`], so an error implementing this trait gets sensible retry
/// behavior without a custom predicate.
///
/// [`is_retryable`]: ErrorClassification::is_retryable
/// [`retry_after`]: ErrorClassification::retry_after
pub trait ErrorClassification {
    /// Transient failure that may succeed on another attempt
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    /// Needs an operator, not a retry
    fn is_critical(&self) -> bool;

    /// Earliest point a retry is worth making, when the error knows it
    fn retry_after(&self) -> Option<Duration>;
}

/// Ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("JSON", err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization("TOML", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

/// Route `serde_json::Error` and `std::io::Error` into a module error
/// through its `CommonError` variant.
///
/// ```rust,ignore
/// impl_error_conversion!(StoreError, Common);
/// ```
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };
}

/// Implement [`ErrorClassification`] for a module error.
///
/// The `Common` variant delegates to [`CommonError`]; every other variant is
/// listed with its classification. `retry_after` is optional per arm.
///
/// ```rust,ignore
/// impl_error_classification!(DeliveryError, Common,
///     Self::Transient { .. } => {
///         retryable: true,
///         severity: ErrorSeverity::Warning,
///         critical: false,
///     },
///     Self::Permanent { .. } => {
///         retryable: false,
///         severity: ErrorSeverity::Error,
///         critical: false,
///     }
/// );
/// ```
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            // Arm patterns may bind fields only `retry_after` reads.
            #[allow(unused_variables)]
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::is_retryable(inner)
                    }
                    $( $variant => $retryable, )*
                }
            }

            #[allow(unused_variables)]
            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::severity(inner)
                    }
                    $( $variant => $severity, )*
                }
            }

            #[allow(unused_variables)]
            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::is_critical(inner)
                    }
                    $( $variant => $critical, )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::retry_after(inner)
                    }
                    $( $( $variant => $retry_after, )? )*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
