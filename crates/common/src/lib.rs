//! Error vocabulary and resilience primitives for FastBreak.
//!
//! Nothing is enabled by default. `foundation` brings in [`error`];
//! `runtime` adds [`resilience`] (retry, circuit breaker, bulkhead and their
//! composition) along with `observability`, which wires in `tracing`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

#[cfg(feature = "foundation")]
pub mod error;

#[cfg(feature = "runtime")]
pub mod resilience;

#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    Bulkhead, BulkheadConfig, BulkheadError, BulkheadStats, CircuitBreaker, CircuitBreakerConfig,
    CircuitSnapshot, CircuitState, Clock, EventSink, MockClock, ResilienceError,
    ResilienceEvent, ResilienceResult, RetryCondition, RetryError, RetryExecutor, RetryPolicy,
    RetryResult, SystemClock, TokioClock,
};
