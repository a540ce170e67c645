//! Bulkhead pattern for limiting concurrent operations
//!
//! The bulkhead pattern prevents resource exhaustion by limiting the number
//! of concurrent operations against one resource. A call runs immediately if
//! fewer than `max_concurrent` calls are active; otherwise it waits in a FIFO
//! queue of at most `max_queue_depth` callers; beyond that it is rejected
//! with `BulkheadFull`.
//!
//! When a running call finishes, its slot is handed directly to the oldest
//! queued caller, so `active <= max_concurrent` holds at every instant and
//! admission order is strictly FIFO. A queued caller that is dropped (or hits
//! the optional queue timeout) leaves the queue without leaking a slot.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::instrument;

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use super::events::{default_sink, EventSink, ResilienceEvent};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent: usize,
    /// Maximum number of operations waiting in queue
    pub max_queue_depth: usize,
    /// Optional limit on how long a queued operation waits for a slot
    pub queue_timeout: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_queue_depth: 10, queue_timeout: None }
    }
}

impl BulkheadConfig {
    /// Create a new configuration builder
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        if self.queue_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid("queue_timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for BulkheadConfig
#[derive(Debug, Clone, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn max_queue_depth(mut self, max: usize) -> Self {
        self.config.max_queue_depth = max;
        self
    }

    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Reasons a bulkhead refuses to hand out a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BulkheadError {
    #[error("Bulkhead full: {capacity} calls already in flight")]
    Full { capacity: usize },

    #[error("Timed out after {timeout:?} waiting for a bulkhead slot")]
    Timeout { timeout: Duration },
}

impl<E> From<BulkheadError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: BulkheadError) -> Self {
        match err {
            BulkheadError::Full { capacity } => Self::BulkheadFull { capacity },
            BulkheadError::Timeout { timeout } => Self::Timeout { timeout },
        }
    }
}

/// Bulkhead statistics: `{active_requests, queue_length}` plus counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadStats {
    pub active_requests: usize,
    pub queue_length: usize,
    pub max_concurrent: usize,
    pub max_queue_depth: usize,
    /// Slots granted so far
    pub executed: u64,
    pub rejected: u64,
    pub timed_out: u64,
}

struct Waiter {
    id: u64,
    slot: oneshot::Sender<()>,
}

#[derive(Default)]
struct SlotState {
    active: usize,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct Inner {
    name: String,
    config: BulkheadConfig,
    slots: Mutex<SlotState>,
    executed: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl Inner {
    /// Give the slot held by the caller to the oldest live waiter, or free it
    fn release(&self) {
        let mut slots = self.slots.lock();
        while let Some(waiter) = slots.queue.pop_front() {
            if waiter.slot.send(()).is_ok() {
                return;
            }
        }
        slots.active = slots.active.saturating_sub(1);
    }
}

/// Bulkhead for limiting concurrent operations
///
/// Clones share the same slots and queue.
#[derive(Clone)]
pub struct Bulkhead {
    inner: Arc<Inner>,
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.get_stats();
        f.debug_struct("Bulkhead")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("active_requests", &stats.active_requests)
            .field("queue_length", &stats.queue_length)
            .finish()
    }
}

/// Slot held for the duration of one operation; dropping it frees the slot
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BulkheadPermit {
    inner: Arc<Inner>,
}

impl fmt::Debug for BulkheadPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadPermit").field("bulkhead", &self.inner.name).finish()
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Removes a queued caller from the queue if its wait is abandoned
struct QueuedWaiter {
    inner: Arc<Inner>,
    id: u64,
    slot: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for QueuedWaiter {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        {
            let mut slots = self.inner.slots.lock();
            if let Some(pos) = slots.queue.iter().position(|w| w.id == self.id) {
                slots.queue.remove(pos);
                return;
            }
        }
        // Already dequeued: the slot was handed to us after we stopped waiting
        if self.slot.try_recv().is_ok() {
            self.inner.release();
        }
    }
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> ConfigResult<Self> {
        Self::with_event_sink(name, config, default_sink())
    }

    pub fn with_event_sink(
        name: impl Into<String>,
        config: BulkheadConfig,
        sink: Arc<dyn EventSink>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                slots: Mutex::new(SlotState::default()),
                executed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                sink,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.inner.config
    }

    /// Acquire a slot, waiting in the FIFO queue when all slots are busy
    ///
    /// Fails immediately with [`BulkheadError::Full`] when the queue is full,
    /// and with [`BulkheadError::Timeout`] when a configured queue timeout
    /// elapses first.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadError> {
        let mut waiter = match self.admit() {
            Some(Admitted::Permit(permit)) => return Ok(permit),
            Some(Admitted::Queued(waiter)) => waiter,
            None => return Err(BulkheadError::Full { capacity: self.capacity() }),
        };

        let received = match self.inner.config.queue_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut waiter.slot).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.timed_out.fetch_add(1, Ordering::Relaxed);
                    return Err(BulkheadError::Timeout { timeout });
                }
            },
            None => (&mut waiter.slot).await,
        };

        match received {
            Ok(()) => {
                waiter.granted = true;
                self.inner.executed.fetch_add(1, Ordering::Relaxed);
                Ok(BulkheadPermit { inner: Arc::clone(&self.inner) })
            }
            // Sender dropped without a slot; only happens if the waiter was
            // discarded from the queue, which we treat as a rejection.
            Err(_) => Err(BulkheadError::Full { capacity: self.capacity() }),
        }
    }

    /// Acquire a slot only if one is free right now; never queues
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        let mut slots = self.inner.slots.lock();
        if slots.active < self.inner.config.max_concurrent && slots.queue.is_empty() {
            slots.active += 1;
            self.inner.executed.fetch_add(1, Ordering::Relaxed);
            return Some(BulkheadPermit { inner: Arc::clone(&self.inner) });
        }
        None
    }

    /// Execute an operation within the bulkhead
    #[instrument(skip_all, fields(bulkhead = %self.inner.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _permit = self.acquire().await?;
        operation().await.map_err(|source| ResilienceError::OperationFailed { source })
    }

    /// Execute an operation that already reports resilience errors
    pub async fn execute_flattened<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _permit = self.acquire().await?;
        operation().await
    }

    /// Get bulkhead statistics
    pub fn get_stats(&self) -> BulkheadStats {
        let slots = self.inner.slots.lock();
        BulkheadStats {
            active_requests: slots.active,
            queue_length: slots.queue.len(),
            max_concurrent: self.inner.config.max_concurrent,
            max_queue_depth: self.inner.config.max_queue_depth,
            executed: self.inner.executed.load(Ordering::Acquire),
            rejected: self.inner.rejected.load(Ordering::Acquire),
            timed_out: self.inner.timed_out.load(Ordering::Acquire),
        }
    }

    fn capacity(&self) -> usize {
        self.inner.config.max_concurrent
    }

    /// Decide admission under the lock: a permit, a queue position, or
    /// rejection (`None`).
    fn admit(&self) -> Option<Admitted> {
        let mut slots = self.inner.slots.lock();
        if slots.active < self.inner.config.max_concurrent && slots.queue.is_empty() {
            slots.active += 1;
            self.inner.executed.fetch_add(1, Ordering::Relaxed);
            return Some(Admitted::Permit(BulkheadPermit { inner: Arc::clone(&self.inner) }));
        }

        if slots.queue.len() >= self.inner.config.max_queue_depth {
            let (active, queue_length) = (slots.active, slots.queue.len());
            drop(slots);
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            self.inner.sink.emit(&ResilienceEvent::BulkheadRejected {
                name: self.inner.name.clone(),
                active,
                queue_length,
            });
            return None;
        }

        let id = slots.next_waiter_id;
        slots.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        slots.queue.push_back(Waiter { id, slot: tx });
        let queue_length = slots.queue.len();
        drop(slots);

        self.inner
            .sink
            .emit(&ResilienceEvent::BulkheadQueued { name: self.inner.name.clone(), queue_length });
        Some(Admitted::Queued(QueuedWaiter {
            inner: Arc::clone(&self.inner),
            id,
            slot: rx,
            granted: false,
        }))
    }
}

enum Admitted {
    Permit(BulkheadPermit),
    Queued(QueuedWaiter),
}
