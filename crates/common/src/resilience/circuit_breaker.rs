//! Circuit breaker for fail-fast protection of a failing dependency
//!
//! State machine:
//!
//! - **Closed → Open** on the `failure_threshold`-th consecutive failure.
//! - **Open → HalfOpen** once `open_timeout` has elapsed since the circuit
//!   opened.
//! - **HalfOpen → Closed** when `success_threshold` trial calls succeed; the
//!   failure count resets to 0.
//! - **HalfOpen → Open** when a trial call fails; the open timer restarts.
//!
//! While Open (and before the timeout elapses) every call is rejected with
//! [`ResilienceError::CircuitOpen`] and the wrapped operation is never
//! invoked. At most `half_open_max_calls` trial calls run concurrently in
//! HalfOpen; further calls are rejected the same way.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use super::events::{default_sink, EventSink, ResilienceEvent};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Successful trial calls needed to close the circuit from half-open
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    pub open_timeout: Duration,
    /// Maximum number of concurrent trial calls in half-open state
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`] and [`CircuitBreaker`]
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker: `{state, failure_count, last_failure_time}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Consecutive failures counted toward the threshold
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
    pub state_changed_at: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every entry into HalfOpen; trial slots from an earlier
    /// half-open period are ignored on release
    trial_epoch: u64,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    state_changed_at: Instant,
}

/// Admission granted to one call; tells the outcome handler whether the call
/// was a half-open trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial { epoch: u64 },
}

/// Half-open trial slot, returned to the breaker when dropped.
///
/// A trial whose future is dropped before it settles gives its slot back, so
/// the next caller can run a trial instead of the circuit staying half-open.
struct TrialSlot<'a, C: Clock> {
    inner: &'a Inner<C>,
    epoch: u64,
}

impl<C: Clock> Drop for TrialSlot<'_, C> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.state == CircuitState::HalfOpen && state.trial_epoch == self.epoch {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }
}

struct Inner<C: Clock> {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    clock: C,
    sink: Arc<dyn EventSink>,
}

/// Generic circuit breaker implementation
///
/// Clones share state, so one breaker per protected dependency can be handed
/// to every caller.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.get_state();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using system
    /// clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    failure_count: 0,
                    half_open_successes: 0,
                    half_open_in_flight: 0,
                    trial_epoch: 0,
                    last_failure_time: None,
                    opened_at: None,
                    state_changed_at: now,
                }),
                total_calls: AtomicU64::new(0),
                total_successes: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
                rejected_calls: AtomicU64::new(0),
                clock,
                sink: default_sink(),
            }),
        })
    }

    /// Replace the event sink. Only valid before the breaker is shared.
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.sink = sink;
                Self { inner: Arc::new(inner) }
            }
            Err(inner) => Self { inner },
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Returns `CircuitOpen` without calling `operation` when the circuit
    /// rejects the call. Operation errors are wrapped in `OperationFailed`.
    #[instrument(skip_all, fields(circuit = %self.inner.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_flattened(|| async move {
            operation().await.map_err(|source| ResilienceError::OperationFailed { source })
        })
        .await
    }

    /// Execute an operation that already reports resilience errors
    ///
    /// Used when stacking breakers over other resilience layers so the error
    /// type does not nest. Every error counts as a failure.
    pub async fn execute_flattened<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let admission = match self.try_acquire() {
            Some(admission) => admission,
            None => {
                self.inner.rejected_calls.fetch_add(1, Ordering::Relaxed);
                let retry_after = self.retry_after().unwrap_or(Duration::ZERO);
                debug!(
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "circuit rejecting call"
                );
                return Err(ResilienceError::CircuitOpen { retry_after });
            }
        };
        let trial_slot = match admission {
            Admission::Trial { epoch } => Some(TrialSlot { inner: self.inner.as_ref(), epoch }),
            Admission::Normal => None,
        };

        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        let result = operation().await;
        match &result {
            Ok(_) => self.on_success(admission),
            Err(_) => self.on_failure(admission),
        }
        drop(trial_slot);
        result
    }

    /// Whether a call made now would be admitted. Does not change state.
    pub fn is_call_permitted(&self) -> bool {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.open_elapsed(&state, now),
            CircuitState::HalfOpen => {
                state.half_open_in_flight < self.inner.config.half_open_max_calls
            }
        }
    }

    /// Remaining time until an open circuit admits a trial call
    ///
    /// `None` unless the circuit is Open.
    pub fn retry_after(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        if state.state != CircuitState::Open {
            return None;
        }
        let opened_at = state.opened_at?;
        Some(self.inner.config.open_timeout.saturating_sub(now.saturating_duration_since(opened_at)))
    }

    /// Get the current state: `{state, failure_count, last_failure_time}`
    ///
    /// An Open circuit whose timeout has elapsed reports `HalfOpen`, matching
    /// what the next call will observe.
    pub fn get_state(&self) -> CircuitSnapshot {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        let current = if state.state == CircuitState::Open && self.open_elapsed(&state, now) {
            CircuitState::HalfOpen
        } else {
            state.state
        };
        CircuitSnapshot {
            state: current,
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Shorthand for `get_state().state`
    pub fn state(&self) -> CircuitState {
        self.get_state().state
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let snapshot = self.get_state();
        let state_changed_at = self.inner.state.lock().state_changed_at;
        CircuitBreakerMetrics {
            state: snapshot.state,
            failure_count: snapshot.failure_count,
            total_calls: self.inner.total_calls.load(Ordering::Acquire),
            total_successes: self.inner.total_successes.load(Ordering::Acquire),
            total_failures: self.inner.total_failures.load(Ordering::Acquire),
            rejected_calls: self.inner.rejected_calls.load(Ordering::Acquire),
            last_failure_time: snapshot.last_failure_time,
            state_changed_at,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let from = state.state;
        state.failure_count = 0;
        state.half_open_successes = 0;
        state.half_open_in_flight = 0;
        state.last_failure_time = None;
        state.opened_at = None;
        if from != CircuitState::Closed {
            self.transition(&mut state, CircuitState::Closed, now);
        }
        debug!(circuit = %self.inner.name, "circuit manually reset");
    }

    fn open_elapsed(&self, state: &BreakerState, now: Instant) -> bool {
        state
            .opened_at
            .is_some_and(|opened| now.saturating_duration_since(opened) >= self.inner.config.open_timeout)
    }

    fn try_acquire(&self) -> Option<Admission> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        match state.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                if !self.open_elapsed(&state, now) {
                    return None;
                }
                self.transition(&mut state, CircuitState::HalfOpen, now);
                state.half_open_in_flight = 1;
                Some(Admission::Trial { epoch: state.trial_epoch })
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight >= self.inner.config.half_open_max_calls {
                    return None;
                }
                state.half_open_in_flight += 1;
                Some(Admission::Trial { epoch: state.trial_epoch })
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        self.inner.total_successes.fetch_add(1, Ordering::Relaxed);
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        match (admission, state.state) {
            (Admission::Trial { epoch }, CircuitState::HalfOpen) if epoch == state.trial_epoch => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.inner.config.success_threshold {
                    state.failure_count = 0;
                    state.opened_at = None;
                    self.transition(&mut state, CircuitState::Closed, now);
                }
            }
            (Admission::Normal, CircuitState::Closed) => state.failure_count = 0,
            // Stale outcome from a call admitted under an earlier state
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        self.inner.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.last_failure_time = Some(now);
        match (admission, state.state) {
            (Admission::Trial { epoch }, CircuitState::HalfOpen) if epoch == state.trial_epoch => {
                state.half_open_in_flight = 0;
                state.failure_count = state.failure_count.saturating_add(1);
                state.opened_at = Some(now);
                self.transition(&mut state, CircuitState::Open, now);
            }
            (Admission::Normal, CircuitState::Closed) => {
                state.failure_count = state.failure_count.saturating_add(1);
                if state.failure_count >= self.inner.config.failure_threshold {
                    state.opened_at = Some(now);
                    self.transition(&mut state, CircuitState::Open, now);
                }
            }
            _ => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        state.state_changed_at = now;
        if to == CircuitState::HalfOpen {
            state.half_open_successes = 0;
            state.half_open_in_flight = 0;
            state.trial_epoch = state.trial_epoch.wrapping_add(1);
        }
        self.inner.sink.emit(&ResilienceEvent::CircuitStateChanged {
            name: self.inner.name.clone(),
            from,
            to,
        });
    }
}
