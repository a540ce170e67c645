//! Resilience patterns for fault tolerance and error handling
//!
//! This module provides **generic, reusable** resilience patterns:
//! - **Retry**: bounded retries with exponential backoff and optional jitter
//! - **Circuit Breaker**: stops calling a persistently failing dependency for
//!   a cooldown period
//! - **Bulkhead**: bounds concurrent in-flight calls against one resource,
//!   queueing overflow in FIFO order and rejecting beyond the queue depth
//!
//! The patterns are stacked with explicit function composition (see
//! [`compose`]) rather than annotations. The delivery engine stacks them as
//! Bulkhead → CircuitBreaker → operation, one pair per channel.
//!
//! ## Testability
//!
//! - Circuit breakers take a pluggable [`Clock`]; tests use [`MockClock`] to
//!   drive open timeouts without sleeping, and async tests with paused tokio
//!   time use [`TokioClock`].
//! - Retry backoff and bulkhead queue waits go through `tokio::time`, so
//!   `#[tokio::test(start_paused = true)]` runs them instantly.
//! - Every primitive reports to an [`EventSink`]; tests install a
//!   [`RecordingEventSink`] to assert on the emitted [`ResilienceEvent`]s.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod compose;
pub mod error;
pub mod events;
pub mod retry;

pub use bulkhead::{
    Bulkhead, BulkheadConfig, BulkheadConfigBuilder, BulkheadError, BulkheadPermit, BulkheadStats,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitSnapshot, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock, TokioClock};
pub use compose::{lift, with_bulkhead, with_circuit_breaker, with_retry, ResilientCall};
pub use error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
pub use events::{EventSink, NoopEventSink, RecordingEventSink, ResilienceEvent, TracingEventSink};
pub use retry::{
    conditions, RetryCondition, RetryDecision, RetryError, RetryExecutor, RetryOutcome,
    RetryPolicy, RetryPolicyBuilder, RetryResult,
};
