//! Priority delivery queue with delayed visibility
//!
//! Jobs are ordered by priority tier (high before medium before low) and by
//! arrival within a tier. Scheduled and retried jobs sit in a delayed set
//! keyed by their visibility time and are promoted into the ready heap once
//! due. A dequeued job is in flight until it is acked or handed back with
//! [`DeliveryQueue::retry`] / [`DeliveryQueue::schedule`]; it cannot be
//! dequeued twice in the meantime.
//!
//! The in-memory state is authoritative for the running process. Every
//! mutation is mirrored to a [`QueueStore`] so pending jobs survive a
//! restart: [`DeliveryQueue::open`] reloads them.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fastbreak_domain::constants::{DEFAULT_BASE_RETRY_DELAY_MS, DEFAULT_QUEUE_CAPACITY};
use fastbreak_domain::{DeliveryConfig, DeliveryStatus, JobId, NotificationJob, Priority};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::errors::QueueError;
use super::ports::QueueStore;

/// Exponent cap for the default `base * 2^retry_count` backoff
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Queue limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Queued plus in-flight jobs
    pub capacity: usize,
    /// Base of the default retry backoff
    pub base_retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            base_retry_delay: Duration::from_millis(DEFAULT_BASE_RETRY_DELAY_MS),
        }
    }
}

impl From<&DeliveryConfig> for QueueConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self { capacity: config.queue_capacity, base_retry_delay: config.base_retry_delay() }
    }
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    pub retried: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    id: JobId,
}

impl Ord for ReadyEntry {
    // Max-heap: highest tier first, then lowest sequence (oldest) first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ready,
    Delayed,
}

struct Queued {
    job: NotificationJob,
    /// Heap and delayed-set entries with another sequence are stale
    seq: u64,
    slot: Slot,
}

#[derive(Default)]
struct QueueState {
    open: bool,
    next_seq: u64,
    jobs: HashMap<JobId, Queued>,
    ready: BinaryHeap<ReadyEntry>,
    delayed: BTreeSet<(Instant, u64, JobId)>,
    in_flight: HashSet<JobId>,
    /// New jobs whose store write has not finished yet
    reserved: HashSet<JobId>,
}

impl QueueState {
    fn len(&self) -> usize {
        self.jobs.len() + self.in_flight.len() + self.reserved.len()
    }

    fn insert(&mut self, job: NotificationJob, delay: Duration, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = job.id;

        let slot = if delay.is_zero() {
            self.ready.push(ReadyEntry { priority: job.priority, seq, id });
            Slot::Ready
        } else {
            self.delayed.insert((now + delay, seq, id));
            Slot::Delayed
        };
        self.jobs.insert(id, Queued { job, seq, slot });
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(&(visible_at, seq, id)) = self.delayed.first() {
            if visible_at > now {
                break;
            }
            self.delayed.pop_first();
            if let Some(queued) = self.jobs.get_mut(&id) {
                if queued.seq == seq {
                    queued.slot = Slot::Ready;
                    self.ready.push(ReadyEntry { priority: queued.job.priority, seq, id });
                }
            }
        }
    }

    fn pop_ready(&mut self) -> Option<NotificationJob> {
        while let Some(entry) = self.ready.pop() {
            let current = self
                .jobs
                .get(&entry.id)
                .is_some_and(|queued| queued.seq == entry.seq && queued.slot == Slot::Ready);
            if !current {
                continue;
            }
            if let Some(queued) = self.jobs.remove(&entry.id) {
                self.in_flight.insert(entry.id);
                return Some(queued.job);
            }
        }
        None
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.delayed.first().map(|(visible_at, _, _)| *visible_at)
    }
}

enum Poll {
    Job(NotificationJob),
    Wait(Option<Instant>),
}

/// Priority-ordered, delay-aware job queue backed by a [`QueueStore`]
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    available: Notify,
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
}

impl DeliveryQueue {
    /// Create a closed queue; call [`open`](Self::open) before use
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            store,
            config,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Open the queue, reloading pending jobs from the store
    ///
    /// Returns the number of jobs restored. Opening an open queue is a no-op.
    #[instrument(skip(self))]
    pub async fn open(&self) -> Result<usize, QueueError> {
        if self.state.lock().open {
            return Ok(0);
        }

        let pending = self.store.load_pending().await?;
        let now = Instant::now();
        let wall_now = Utc::now();

        let restored = {
            let mut state = self.state.lock();
            let mut restored = 0;
            for stored in pending {
                let id = stored.job.id;
                if stored.job.state.is_final()
                    || state.jobs.contains_key(&id)
                    || state.in_flight.contains(&id)
                    || state.reserved.contains(&id)
                {
                    continue;
                }
                let delay = stored
                    .not_before
                    .and_then(|at| (at - wall_now).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                state.insert(stored.job, delay, now);
                restored += 1;
            }
            state.open = true;
            restored
        };

        self.available.notify_waiters();
        info!(restored, "delivery queue opened");
        Ok(restored)
    }

    /// Close the queue; consumers waiting in `dequeue_wait` return `Closed`
    ///
    /// New jobs are refused, but jobs already in flight can still be handed
    /// back with `retry` / `schedule` or finished with `ack`. Queued jobs stay
    /// in the store and are reloaded by the next `open`.
    pub fn close(&self) {
        self.state.lock().open = false;
        self.available.notify_waiters();
        info!("delivery queue closed");
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Queued plus in-flight jobs
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a new job, visible immediately
    pub async fn add(&self, job: NotificationJob) -> Result<(), QueueError> {
        self.enqueue(job, Duration::ZERO, false).await
    }

    /// Queue several jobs, stopping at the first failure
    ///
    /// Returns the number of jobs queued.
    pub async fn add_bulk(
        &self,
        jobs: impl IntoIterator<Item = NotificationJob>,
    ) -> Result<usize, QueueError> {
        let mut added = 0;
        for job in jobs {
            self.add(job).await?;
            added += 1;
        }
        Ok(added)
    }

    /// Queue a job that becomes visible after `delay`
    ///
    /// An in-flight job is handed back to the queue unchanged (no retry is
    /// counted); any other job is queued as new.
    pub async fn schedule(&self, job: NotificationJob, delay: Duration) -> Result<(), QueueError> {
        self.enqueue(job, delay, true).await
    }

    /// Re-enqueue an in-flight job after a failed pass
    ///
    /// Increments `retry_count`, stamps `last_attempt_at` and returns the
    /// status of the job as queued.
    pub async fn retry(
        &self,
        mut job: NotificationJob,
        delay: Duration,
    ) -> Result<DeliveryStatus, QueueError> {
        if !self.state.lock().in_flight.contains(&job.id) {
            return Err(QueueError::NotInFlight(job.id));
        }

        job.retry_count += 1;
        job.last_attempt_at = Some(Utc::now());
        let status = job.status();
        self.enqueue(job, delay, true).await?;
        self.retried.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(status)
    }

    /// [`retry`](Self::retry) with the queue's `base * 2^retry_count` delay
    pub async fn retry_with_default_backoff(
        &self,
        job: NotificationJob,
    ) -> Result<DeliveryStatus, QueueError> {
        let delay = self.default_backoff(job.retry_count);
        self.retry(job, delay).await
    }

    /// `base_retry_delay * 2^retry_count`
    pub fn default_backoff(&self, retry_count: u32) -> Duration {
        let factor = 1_u32 << retry_count.min(MAX_BACKOFF_EXPONENT);
        self.config.base_retry_delay.saturating_mul(factor)
    }

    /// Take the highest-priority visible job, if any
    pub fn dequeue_next(&self) -> Result<Option<NotificationJob>, QueueError> {
        match self.poll()? {
            Poll::Job(job) => Ok(Some(job)),
            Poll::Wait(_) => Ok(None),
        }
    }

    /// Take the next visible job, waiting up to `timeout` for one
    pub async fn dequeue_wait(
        &self,
        timeout: Duration,
    ) -> Result<Option<NotificationJob>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = match self.poll()? {
                Poll::Job(job) => return Ok(Some(job)),
                Poll::Wait(next_visible) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    next_visible.map_or(deadline, |at| at.min(deadline))
                }
            };

            tokio::select! {
                () = notified.as_mut() => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Remove an in-flight job that is finished
    pub async fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        if !self.state.lock().in_flight.remove(&job_id) {
            return Err(QueueError::NotInFlight(job_id));
        }
        self.store.ack(job_id).await?;
        debug!(%job_id, "job acked");
        Ok(())
    }

    /// Drop a queued job before it is dispatched
    ///
    /// Returns `false` if the job is not queued (unknown, or already in
    /// flight; dispatched jobs are not interrupted).
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        if self.state.lock().jobs.remove(&job_id).is_none() {
            return Ok(false);
        }
        self.cancelled.fetch_add(1, AtomicOrdering::Relaxed);
        self.store.ack(job_id).await?;
        info!(%job_id, "job cancelled");
        Ok(true)
    }

    pub fn stats(&self) -> QueueStats {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        let ready = state.jobs.values().filter(|queued| queued.slot == Slot::Ready).count();
        QueueStats {
            ready,
            delayed: state.jobs.len() - ready,
            in_flight: state.in_flight.len(),
            enqueued: self.enqueued.load(AtomicOrdering::Relaxed),
            dequeued: self.dequeued.load(AtomicOrdering::Relaxed),
            retried: self.retried.load(AtomicOrdering::Relaxed),
            cancelled: self.cancelled.load(AtomicOrdering::Relaxed),
        }
    }

    fn poll(&self) -> Result<Poll, QueueError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(QueueError::Closed);
        }
        state.promote_due(Instant::now());
        match state.pop_ready() {
            Some(job) => {
                self.dequeued.fetch_add(1, AtomicOrdering::Relaxed);
                debug!(job_id = %job.id, priority = %job.priority, "job dequeued");
                Ok(Poll::Job(job))
            }
            None => Ok(Poll::Wait(state.next_visible_at())),
        }
    }

    async fn enqueue(
        &self,
        job: NotificationJob,
        delay: Duration,
        allow_requeue: bool,
    ) -> Result<(), QueueError> {
        let id = job.id;
        let requeue = {
            let mut state = self.state.lock();
            let requeue = allow_requeue && state.in_flight.contains(&id);
            if !requeue {
                if !state.open {
                    return Err(QueueError::Closed);
                }
                if state.jobs.contains_key(&id)
                    || state.in_flight.contains(&id)
                    || state.reserved.contains(&id)
                {
                    return Err(QueueError::Duplicate(id));
                }
                if state.len() >= self.config.capacity {
                    return Err(QueueError::Full { capacity: self.config.capacity });
                }
                state.reserved.insert(id);
            }
            requeue
        };

        // Persist before the job is visible to consumers.
        let persisted = if requeue {
            self.store.nack(&job, delay).await
        } else {
            self.store.enqueue(&job, not_before(delay)).await
        };

        {
            let mut state = self.state.lock();
            if requeue {
                state.in_flight.remove(&id);
                state.insert(job, delay, Instant::now());
            } else {
                state.reserved.remove(&id);
                if persisted.is_ok() {
                    state.insert(job, delay, Instant::now());
                }
            }
        }

        if let Err(err) = persisted {
            if requeue {
                warn!(job_id = %id, error = %err, "failed to persist requeued job");
            }
            return Err(err.into());
        }

        if !requeue {
            self.enqueued.fetch_add(1, AtomicOrdering::Relaxed);
        }
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(job_id = %id, delay_ms, requeue, "job queued");
        self.available.notify_one();
        Ok(())
    }
}

fn not_before(delay: Duration) -> Option<DateTime<Utc>> {
    if delay.is_zero() {
        return None;
    }
    chrono::Duration::from_std(delay).ok().and_then(|delay| Utc::now().checked_add_signed(delay))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use fastbreak_domain::{
        Channel, FastBreakError, NotificationRequest, NotificationType, Result as DomainResult,
    };
    use tokio::sync::Semaphore;

    use super::*;
    use crate::delivery::ports::StoredJob;

    #[derive(Default)]
    struct TestStore {
        jobs: Mutex<HashMap<JobId, StoredJob>>,
        fail_writes: AtomicBool,
        /// When set, each `enqueue` waits for one permit
        enqueue_permits: Option<Semaphore>,
    }

    impl TestStore {
        fn check(&self) -> DomainResult<()> {
            if self.fail_writes.load(AtomicOrdering::SeqCst) {
                return Err(FastBreakError::Persistence("store offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueueStore for TestStore {
        async fn enqueue(
            &self,
            job: &NotificationJob,
            not_before: Option<DateTime<Utc>>,
        ) -> DomainResult<()> {
            if let Some(permits) = &self.enqueue_permits {
                permits.acquire().await.expect("gate open").forget();
            }
            self.check()?;
            self.jobs.lock().insert(job.id, StoredJob { job: job.clone(), not_before });
            Ok(())
        }

        async fn ack(&self, job_id: JobId) -> DomainResult<()> {
            self.check()?;
            self.jobs.lock().remove(&job_id);
            Ok(())
        }

        async fn nack(&self, job: &NotificationJob, retry_after: Duration) -> DomainResult<()> {
            self.check()?;
            self.jobs
                .lock()
                .insert(job.id, StoredJob { job: job.clone(), not_before: not_before(retry_after) });
            Ok(())
        }

        async fn load_pending(&self) -> DomainResult<Vec<StoredJob>> {
            Ok(self.jobs.lock().values().cloned().collect())
        }
    }

    fn job(priority: Priority) -> NotificationJob {
        let request =
            NotificationRequest::new("user-1", NotificationType::Opportunity, "Deal", "Floor -8%")
                .with_priority(priority);
        NotificationJob::new(request, [Channel::Email], 3)
    }

    async fn open_queue(config: QueueConfig) -> (Arc<TestStore>, DeliveryQueue) {
        let store = Arc::new(TestStore::default());
        let queue = DeliveryQueue::new(store.clone(), config);
        queue.open().await.expect("open");
        (store, queue)
    }

    fn next_id(queue: &DeliveryQueue) -> Option<JobId> {
        queue.dequeue_next().expect("open queue").map(|job| job.id)
    }

    /// Validates strict priority across tiers and FIFO within a tier.
    ///
    /// Assertions:
    /// - High jobs come out before medium, medium before low.
    /// - Jobs of one tier come out in insertion order.
    #[tokio::test]
    async fn dequeues_by_priority_then_arrival() {
        let (_, queue) = open_queue(QueueConfig::default()).await;
        let low = job(Priority::Low);
        let medium_a = job(Priority::Medium);
        let high = job(Priority::High);
        let medium_b = job(Priority::Medium);
        let order = [high.id, medium_a.id, medium_b.id, low.id];

        queue.add_bulk([low, medium_a, high, medium_b]).await.expect("add");

        for expected in order {
            assert_eq!(next_id(&queue), Some(expected));
        }
        assert_eq!(next_id(&queue), None);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_job_is_invisible_until_due() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        let scheduled = job(Priority::High);
        let id = scheduled.id;
        queue.schedule(scheduled, Duration::from_secs(5)).await.expect("schedule");

        assert!(store.jobs.lock()[&id].not_before.is_some());
        assert_eq!(next_id(&queue), None);
        assert_eq!(queue.stats().delayed, 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(next_id(&queue), Some(id));
    }

    /// Validates the retry path for an in-flight job.
    ///
    /// # Test Steps
    /// 1. Add and dequeue a job
    /// 2. Retry it with a 100ms delay
    /// 3. Verify retry_count, last_attempt_at and delayed visibility
    #[tokio::test(start_paused = true)]
    async fn retry_requeues_in_flight_job_with_incremented_count() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        queue.add(job(Priority::Medium)).await.expect("add");
        let taken = queue.dequeue_next().expect("open").expect("job");
        let id = taken.id;

        let status = queue.retry(taken, Duration::from_millis(100)).await.expect("retry");
        assert_eq!(status.retry_count, 1);
        assert!(status.last_attempt_at.is_some());
        assert_eq!(store.jobs.lock()[&id].job.retry_count, 1);

        assert_eq!(next_id(&queue), None);
        tokio::time::advance(Duration::from_millis(100)).await;
        let again = queue.dequeue_next().expect("open").expect("visible");
        assert_eq!(again.retry_count, 1);
        assert_eq!(queue.stats().retried, 1);
    }

    #[tokio::test]
    async fn retry_requires_job_in_flight() {
        let (_, queue) = open_queue(QueueConfig::default()).await;
        let queued = job(Priority::Low);
        queue.add(queued.clone()).await.expect("add");

        let err = queue.retry(queued, Duration::ZERO).await.expect_err("not in flight");
        assert!(matches!(err, QueueError::NotInFlight(_)));
    }

    #[tokio::test]
    async fn default_backoff_doubles_per_retry() {
        let config =
            QueueConfig { base_retry_delay: Duration::from_millis(250), ..QueueConfig::default() };
        let (_, queue) = open_queue(config).await;

        assert_eq!(queue.default_backoff(0), Duration::from_millis(250));
        assert_eq!(queue.default_backoff(1), Duration::from_millis(500));
        assert_eq!(queue.default_backoff(3), Duration::from_secs(2));
        assert_eq!(queue.default_backoff(200), queue.default_backoff(MAX_BACKOFF_EXPONENT));
    }

    /// Validates at-most-one dispatch per job id.
    ///
    /// Assertions:
    /// - An in-flight job cannot be added again or dequeued twice.
    /// - Acking releases it; acking twice fails.
    #[tokio::test]
    async fn in_flight_job_is_dispatched_once() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        let original = job(Priority::High);
        queue.add(original.clone()).await.expect("add");
        assert!(matches!(
            queue.add(original.clone()).await,
            Err(QueueError::Duplicate(id)) if id == original.id
        ));

        let taken = queue.dequeue_next().expect("open").expect("job");
        assert!(matches!(queue.add(original.clone()).await, Err(QueueError::Duplicate(_))));
        assert_eq!(next_id(&queue), None);
        assert_eq!(queue.stats().in_flight, 1);

        queue.ack(taken.id).await.expect("ack");
        assert!(store.jobs.lock().is_empty());
        assert!(matches!(queue.ack(taken.id).await, Err(QueueError::NotInFlight(_))));
    }

    #[tokio::test]
    async fn capacity_counts_queued_and_in_flight() {
        let config = QueueConfig { capacity: 2, ..QueueConfig::default() };
        let (_, queue) = open_queue(config).await;
        queue.add(job(Priority::Low)).await.expect("first");
        queue.add(job(Priority::Low)).await.expect("second");
        queue.dequeue_next().expect("open");

        assert!(matches!(queue.add(job(Priority::High)).await, Err(QueueError::Full { capacity: 2 })));
    }

    #[tokio::test]
    async fn cancelled_job_is_skipped() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        let doomed = job(Priority::High);
        let kept = job(Priority::Low);
        let (doomed_id, kept_id) = (doomed.id, kept.id);
        queue.add_bulk([doomed, kept]).await.expect("add");

        assert!(queue.cancel(doomed_id).await.expect("cancel"));
        assert!(!queue.cancel(doomed_id).await.expect("second cancel"));
        assert!(!store.jobs.lock().contains_key(&doomed_id));

        assert_eq!(next_id(&queue), Some(kept_id));
        assert_eq!(next_id(&queue), None);
        assert_eq!(queue.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_new_job() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        store.fail_writes.store(true, AtomicOrdering::SeqCst);

        let err = queue.add(job(Priority::High)).await.expect_err("store offline");
        assert!(matches!(err, QueueError::Store(_)));
        assert!(queue.is_empty());
    }

    /// Validates a new job stays invisible until its store write finishes.
    ///
    /// # Test Steps
    /// 1. Hold the store's `enqueue` and start an add
    /// 2. Verify the job counts against capacity but cannot be dequeued
    /// 3. Release the write and verify the job is dequeued
    #[tokio::test]
    async fn new_job_is_visible_only_after_store_write() {
        let store = Arc::new(TestStore {
            enqueue_permits: Some(Semaphore::new(0)),
            ..TestStore::default()
        });
        let queue = Arc::new(DeliveryQueue::new(store.clone(), QueueConfig::default()));
        queue.open().await.expect("open");

        let incoming = job(Priority::High);
        let id = incoming.id;
        let adding = {
            let queue = Arc::clone(&queue);
            let incoming = incoming.clone();
            tokio::spawn(async move { queue.add(incoming).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(queue.len(), 1);
        assert_eq!(next_id(&queue), None);
        assert!(matches!(queue.add(incoming).await, Err(QueueError::Duplicate(dup)) if dup == id));

        store.enqueue_permits.as_ref().expect("gated").add_permits(1);
        adding.await.expect("join").expect("add");
        assert!(store.jobs.lock().contains_key(&id));
        assert_eq!(next_id(&queue), Some(id));
    }

    #[tokio::test]
    async fn failed_write_never_exposes_new_job() {
        let store = Arc::new(TestStore {
            enqueue_permits: Some(Semaphore::new(0)),
            ..TestStore::default()
        });
        let queue = Arc::new(DeliveryQueue::new(store.clone(), QueueConfig::default()));
        queue.open().await.expect("open");
        store.fail_writes.store(true, AtomicOrdering::SeqCst);

        let adding = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add(job(Priority::High)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(next_id(&queue), None);

        store.enqueue_permits.as_ref().expect("gated").add_permits(1);
        assert!(matches!(adding.await.expect("join"), Err(QueueError::Store(_))));
        assert!(queue.is_empty());
        assert_eq!(next_id(&queue), None);
    }

    /// Validates in-flight jobs can still be settled after `close`.
    ///
    /// # Test Steps
    /// 1. Dequeue two jobs, then close the queue
    /// 2. Retry one and ack the other
    /// 3. Verify nothing is left in flight and the store holds the retried job
    /// 4. Reopen and verify the retried job is dispatched again
    #[tokio::test]
    async fn in_flight_jobs_settle_after_close() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        queue.add_bulk([job(Priority::High), job(Priority::Low)]).await.expect("add");
        let retried = queue.dequeue_next().expect("open").expect("first");
        let finished = queue.dequeue_next().expect("open").expect("second");
        let (retried_id, finished_id) = (retried.id, finished.id);

        queue.close();
        assert!(matches!(queue.add(job(Priority::Low)).await, Err(QueueError::Closed)));

        let status = queue.retry(retried, Duration::ZERO).await.expect("retry while closed");
        assert_eq!(status.retry_count, 1);
        queue.ack(finished_id).await.expect("ack while closed");

        assert_eq!(queue.stats().in_flight, 0);
        {
            let stored = store.jobs.lock();
            assert_eq!(stored[&retried_id].job.retry_count, 1);
            assert!(!stored.contains_key(&finished_id));
        }

        let restarted = DeliveryQueue::new(store.clone(), QueueConfig::default());
        assert_eq!(restarted.open().await.expect("restart"), 1);

        queue.open().await.expect("reopen");
        let again = queue.dequeue_next().expect("open").expect("retried job");
        assert_eq!((again.id, again.retry_count), (retried_id, 1));
        assert_eq!(next_id(&queue), None);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_hands_back_in_flight_job_after_close() {
        let (store, queue) = open_queue(QueueConfig::default()).await;
        queue.add(job(Priority::Medium)).await.expect("add");
        let taken = queue.dequeue_next().expect("open").expect("job");
        let id = taken.id;

        queue.close();
        queue.schedule(taken, Duration::from_secs(60)).await.expect("schedule while closed");

        assert_eq!(queue.stats().in_flight, 0);
        assert!(store.jobs.lock()[&id].not_before.is_some());
    }

    #[tokio::test]
    async fn closed_queue_rejects_operations() {
        let store = Arc::new(TestStore::default());
        let queue = DeliveryQueue::new(store, QueueConfig::default());

        assert!(matches!(queue.add(job(Priority::Low)).await, Err(QueueError::Closed)));
        assert!(matches!(queue.dequeue_next(), Err(QueueError::Closed)));

        queue.open().await.expect("open");
        queue.add(job(Priority::Low)).await.expect("add");
        queue.close();
        assert!(matches!(queue.dequeue_wait(Duration::from_secs(1)).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn open_reloads_pending_jobs_from_store() {
        let store = Arc::new(TestStore::default());
        let first = DeliveryQueue::new(store.clone(), QueueConfig::default());
        first.open().await.expect("open");
        let pending = job(Priority::Medium);
        let id = pending.id;
        first.add(pending).await.expect("add");
        first.close();

        let restarted = DeliveryQueue::new(store, QueueConfig::default());
        assert_eq!(restarted.open().await.expect("reopen"), 1);
        assert_eq!(next_id(&restarted), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_wait_wakes_on_add() {
        let (_, queue) = open_queue(QueueConfig::default()).await;
        let queue = Arc::new(queue);
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;

        let incoming = job(Priority::Low);
        let id = incoming.id;
        queue.add(incoming).await.expect("add");

        let received = waiter.await.expect("join").expect("open");
        assert_eq!(received.map(|job| job.id), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_wait_times_out_empty() {
        let (_, queue) = open_queue(QueueConfig::default()).await;
        let start = Instant::now();

        assert!(queue.dequeue_wait(Duration::from_millis(500)).await.expect("open").is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_wait_returns_delayed_job_when_due() {
        let (_, queue) = open_queue(QueueConfig::default()).await;
        let later = job(Priority::High);
        let id = later.id;
        queue.schedule(later, Duration::from_millis(200)).await.expect("schedule");
        let start = Instant::now();

        let received = queue.dequeue_wait(Duration::from_secs(10)).await.expect("open");
        assert_eq!(received.map(|job| job.id), Some(id));
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
