//! Structured observability events emitted by the resilience primitives
//!
//! Retry, circuit breaker and bulkhead report what they do through an
//! [`EventSink`]. The default sink forwards events to `tracing`; consumers
//! that ship events elsewhere implement the trait themselves.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::circuit_breaker::CircuitState;

/// An observable step taken by a resilience primitive
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// A retry executor is about to run an attempt
    AttemptStarted { operation: String, attempt: u32, max_attempts: u32 },
    /// An attempt returned successfully
    AttemptSucceeded { operation: String, attempt: u32 },
    /// An attempt failed; `retryable` reflects the retry condition's verdict
    AttemptFailed { operation: String, attempt: u32, error: String, retryable: bool },
    /// The executor will sleep for `delay` before `next_attempt`
    RetryScheduled { operation: String, next_attempt: u32, delay: Duration },
    /// A circuit breaker changed state
    CircuitStateChanged { name: String, from: CircuitState, to: CircuitState },
    /// A bulkhead queued a caller because every slot was busy
    BulkheadQueued { name: String, queue_length: usize },
    /// A bulkhead rejected a caller because its queue was full
    BulkheadRejected { name: String, active: usize, queue_length: usize },
}

impl ResilienceEvent {
    /// Stable event name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AttemptStarted { .. } => "attempt_started",
            Self::AttemptSucceeded { .. } => "attempt_succeeded",
            Self::AttemptFailed { .. } => "attempt_failed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::CircuitStateChanged { .. } => "circuit_state_changed",
            Self::BulkheadQueued { .. } => "bulkhead_queued",
            Self::BulkheadRejected { .. } => "bulkhead_rejected",
        }
    }
}

impl fmt::Display for ResilienceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptStarted { operation, attempt, max_attempts } => {
                write!(f, "{operation}: attempt {attempt}/{max_attempts} started")
            }
            Self::AttemptSucceeded { operation, attempt } => {
                write!(f, "{operation}: attempt {attempt} succeeded")
            }
            Self::AttemptFailed { operation, attempt, error, .. } => {
                write!(f, "{operation}: attempt {attempt} failed: {error}")
            }
            Self::RetryScheduled { operation, next_attempt, delay } => {
                write!(f, "{operation}: attempt {next_attempt} scheduled in {delay:?}")
            }
            Self::CircuitStateChanged { name, from, to } => {
                write!(f, "circuit '{name}' {from} -> {to}")
            }
            Self::BulkheadQueued { name, queue_length } => {
                write!(f, "bulkhead '{name}' queued caller (queue length {queue_length})")
            }
            Self::BulkheadRejected { name, active, queue_length } => {
                write!(
                    f,
                    "bulkhead '{name}' rejected caller (active {active}, queued {queue_length})"
                )
            }
        }
    }
}

/// Destination for resilience events
pub trait EventSink: Send + Sync + 'static {
    /// Record one event. Must not block.
    fn emit(&self, event: &ResilienceEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: &ResilienceEvent) {
        (**self).emit(event);
    }
}

/// Forwards events to `tracing` with structured fields
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::AttemptStarted { operation, attempt, max_attempts } => {
                debug!(operation = %operation, attempt, max_attempts, "attempt started");
            }
            ResilienceEvent::AttemptSucceeded { operation, attempt } => {
                debug!(operation = %operation, attempt, "attempt succeeded");
            }
            ResilienceEvent::AttemptFailed { operation, attempt, error, retryable } => {
                warn!(operation = %operation, attempt, retryable, error = %error, "attempt failed");
            }
            ResilienceEvent::RetryScheduled { operation, next_attempt, delay } => {
                debug!(
                    operation = %operation,
                    next_attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retry scheduled"
                );
            }
            ResilienceEvent::CircuitStateChanged { name, from, to } => {
                if *to == CircuitState::Open {
                    warn!(circuit = %name, from = %from, to = %to, "circuit state changed");
                } else {
                    info!(circuit = %name, from = %from, to = %to, "circuit state changed");
                }
            }
            ResilienceEvent::BulkheadQueued { name, queue_length } => {
                debug!(bulkhead = %name, queue_length, "caller queued");
            }
            ResilienceEvent::BulkheadRejected { name, active, queue_length } => {
                warn!(bulkhead = %name, active, queue_length, "caller rejected");
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &ResilienceEvent) {}
}

/// Keeps every event in memory, for assertions in tests
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<ResilienceEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events whose [`ResilienceEvent::kind`] is `kind`
    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

pub(crate) fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingEventSink)
}
