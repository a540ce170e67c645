//! Bounded retry with exponential backoff and optional jitter
//!
//! A [`RetryExecutor`] runs an operation up to [`RetryPolicy::max_attempts`]
//! times. The delay before attempt `k` (k > 1) is
//! `min(base_delay * backoff_multiplier^(k-2), max_delay)`; with jitter
//! enabled it is multiplied by a uniform factor in `[0.75, 1.25]`.
//!
//! Whether a failed attempt may be retried is decided by a
//! [`RetryCondition`]. Errors the condition rejects fail immediately, whatever
//! budget remains.
//!
//! ```rust,ignore
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100))
//!     .backoff_multiplier(2.0)
//!     .build()?;
//!
//! let executor = RetryExecutor::new(policy).with_operation_name("webhook");
//! let response = executor.execute(|| client.post(&payload), Classified).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::instrument;

use super::error::{ConfigError, ConfigResult};
use super::events::{default_sink, EventSink, ResilienceEvent};

/// Lower bound of the jitter factor
const JITTER_MIN: f64 = 0.75;
/// Upper bound of the jitter factor
const JITTER_MAX: f64 = 1.25;

/// Errors returned when a retried operation finally fails
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt failed; `source` is the error of the last attempt
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The retry condition rejected the error raised by `attempt`
    #[error("Operation failed with non-retryable error on attempt {attempt}: {source}")]
    NonRetryable {
        attempt: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::NonRetryable { attempt, .. } => *attempt,
        }
    }

    /// The error raised by the last attempt
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }

    /// Consume the retry error and return the last attempt's error
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of a retry execution including result and summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + 'static,
{
    pub result: RetryResult<T, E>,
    pub attempts: u32,
    /// Sum of the backoff delays slept between attempts
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + 'static,
{
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }

    /// Get the average delay between attempts
    pub fn average_delay(&self) -> Duration {
        if self.attempts <= 1 {
            return Duration::ZERO;
        }
        self.total_delay / (self.attempts - 1)
    }
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the policy's backoff delay
    Retry,
    /// Retry the operation after a delay requested by the error
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Decides whether a failed attempt should be retried
pub trait RetryCondition<E> {
    /// `attempt` is the 1-based number of the attempt that produced `error`
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

impl<E, C: RetryCondition<E> + ?Sized> RetryCondition<E> for &C {
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
        (**self).should_retry(error, attempt)
    }
}

impl<E, C: RetryCondition<E> + ?Sized> RetryCondition<E> for Arc<C> {
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
        (**self).should_retry(error, attempt)
    }
}

/// Pre-defined retry conditions for common scenarios
pub mod conditions {
    use super::{RetryCondition, RetryDecision};
    use crate::error::ErrorClassification;

    /// Retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryCondition<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryCondition<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries while the predicate returns true
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryCondition<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }

    /// Defers to [`ErrorClassification::is_retryable`], honouring the error's
    /// own `retry_after` hint when it has one.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Classified;

    impl<E: ErrorClassification> RetryCondition<E> for Classified {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            match error.retry_after() {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Retry,
            }
        }
    }
}

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single backoff delay
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Multiply each delay by a uniform factor in `[0.75, 1.25]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy builder starting from the defaults
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Validate the policy
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be a finite value >= 1.0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must not be smaller than base_delay"));
        }
        Ok(())
    }

    /// Backoff delay before attempt `attempt`, without jitter
    ///
    /// Attempt 1 runs immediately. Attempt `k > 1` waits
    /// `min(base_delay * backoff_multiplier^(k-2), max_delay)`.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let max_nanos = self.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= max_nanos {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }

    /// Backoff delay before attempt `attempt`, with jitter applied when the
    /// policy enables it
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_before_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(false)
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    operation: String,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, operation: "operation".to_string(), sink: default_sink() }
    }

    /// Name used in events and log fields
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation = name.into();
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an operation with retry logic
    #[instrument(skip_all, fields(operation = %self.operation, max_attempts = self.policy.max_attempts))]
    pub async fn execute<F, Fut, T, E, C>(&self, operation: F, condition: C) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        C: RetryCondition<E>,
    {
        self.execute_with_outcome(operation, condition).await.into_result()
    }

    /// Execute an operation with retry logic and return outcome statistics.
    pub async fn execute_with_outcome<F, Fut, T, E, C>(
        &self,
        mut operation: F,
        condition: C,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        C: RetryCondition<E>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut total_delay = Duration::ZERO;
        let mut attempt = 1;

        loop {
            self.sink.emit(&ResilienceEvent::AttemptStarted {
                operation: self.operation.clone(),
                attempt,
                max_attempts,
            });

            let error = match operation().await {
                Ok(value) => {
                    self.sink.emit(&ResilienceEvent::AttemptSucceeded {
                        operation: self.operation.clone(),
                        attempt,
                    });
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) => error,
            };

            let decision = condition.should_retry(&error, attempt);
            self.sink.emit(&ResilienceEvent::AttemptFailed {
                operation: self.operation.clone(),
                attempt,
                error: error.to_string(),
                retryable: decision != RetryDecision::Stop,
            });

            let delay = match decision {
                RetryDecision::Stop => {
                    return RetryOutcome {
                        result: Err(RetryError::NonRetryable { attempt, source: error }),
                        attempts: attempt,
                        total_delay,
                    };
                }
                _ if attempt >= max_attempts => {
                    return RetryOutcome {
                        result: Err(RetryError::Exhausted { attempts: attempt, source: error }),
                        attempts: attempt,
                        total_delay,
                    };
                }
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::Retry => self.policy.jittered_delay(attempt + 1),
            };

            self.sink.emit(&ResilienceEvent::RetryScheduled {
                operation: self.operation.clone(),
                next_attempt: attempt + 1,
                delay,
            });
            tokio::time::sleep(delay).await;
            total_delay += delay;
            attempt += 1;
        }
    }
}
