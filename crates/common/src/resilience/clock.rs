//! Monotonic time sources for the circuit breaker
//!
//! Breakers measure their open timeout against a [`Clock`]. Production code
//! uses [`SystemClock`] or [`TokioClock`]; unit tests drive a [`MockClock`]
//! by hand.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic instants
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// `std::time::Instant::now`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Reads `tokio::time::Instant`, so a paused runtime
/// (`start_paused = true`) moves breaker timeouts along with `sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        T::now(self)
    }
}

/// Hand-driven clock.
///
/// Every clone reads the same offset, so a test keeps one handle and passes
/// another to the breaker.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(by);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}
