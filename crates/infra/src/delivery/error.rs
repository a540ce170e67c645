//! Worker pool error types

use fastbreak_common::resilience::ConfigError;
use fastbreak_domain::FastBreakError;
use thiserror::Error;

use crate::errors::InfraError;

/// Worker pool lifecycle errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker pool already running")]
    AlreadyRunning,

    #[error("Worker pool not running")]
    NotRunning,

    /// Workers did not finish within the join timeout
    #[error("Workers did not stop within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A worker task panicked or was aborted
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),

    #[error("Invalid worker pool configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<WorkerError> for InfraError {
    fn from(err: WorkerError) -> Self {
        let domain_err = match err {
            WorkerError::AlreadyRunning | WorkerError::NotRunning => {
                FastBreakError::InvalidInput(err.to_string())
            }
            WorkerError::Config(_) => FastBreakError::Config(err.to_string()),
            WorkerError::Timeout { .. } | WorkerError::TaskJoinFailed(_) => {
                FastBreakError::Internal(err.to_string())
            }
        };
        InfraError(domain_err)
    }
}

impl From<WorkerError> for FastBreakError {
    fn from(err: WorkerError) -> Self {
        InfraError::from(err).into()
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
