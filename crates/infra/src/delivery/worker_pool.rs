//! Delivery worker pool with explicit lifecycle management.
//!
//! Spawns `worker_count` tokio tasks that drain the orchestrator's queue.
//! Join handles are tracked, cancellation is explicit, and `stop` waits for
//! every worker under a timeout.
//!
//! Cancellation is only observed between jobs: a job that has been dequeued
//! always finishes its delivery pass and is handed back to the queue before
//! its worker exits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fastbreak_core::{DeliveryOrchestrator, DeliveryQueue, QueueConfig};
//! use fastbreak_domain::Config;
//! use fastbreak_infra::{
//!     DeliveryWorkerPool, MemoryDeliveryRecordRepository, MemoryQueueStore, WorkerPoolConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let queue = Arc::new(DeliveryQueue::new(
//!     Arc::new(MemoryQueueStore::new()),
//!     QueueConfig::from(&config.delivery),
//! ));
//! queue.open().await?;
//! let orchestrator = DeliveryOrchestrator::builder(queue, Arc::new(MemoryDeliveryRecordRepository::new()))
//!     .config(config.clone())
//!     .build()?;
//!
//! let mut pool = DeliveryWorkerPool::new(Arc::new(orchestrator), WorkerPoolConfig::from_config(&config)?);
//! pool.start()?;
//! // ... application runs ...
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use fastbreak_common::resilience::RetryPolicy;
use fastbreak_core::delivery::settings::retry_policy;
use fastbreak_core::{DeliveryOrchestrator, QueueError};
use fastbreak_domain::Config;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use super::error::{WorkerError, WorkerResult};

/// Configuration for the delivery worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker tasks
    pub worker_count: usize,
    /// Longest a worker waits on an empty queue before checking for shutdown
    pub poll_interval: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
    /// Backoff between consecutive queue errors
    pub error_backoff: RetryPolicy,
}

impl WorkerPoolConfig {
    /// Worker settings from the `delivery` section, error backoff from `retry`
    ///
    /// # Errors
    /// Returns `WorkerError::Config` if the retry section is invalid.
    pub fn from_config(config: &Config) -> WorkerResult<Self> {
        Ok(Self {
            worker_count: config.delivery.worker_count,
            poll_interval: config.delivery.poll_interval(),
            join_timeout: config.delivery.worker_join_timeout(),
            error_backoff: retry_policy(&config.retry)?,
        })
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_millis(500),
            join_timeout: Duration::from_secs(5),
            error_backoff: RetryPolicy::default(),
        }
    }
}

/// Pool of delivery workers sharing one orchestrator.
pub struct DeliveryWorkerPool {
    orchestrator: Arc<DeliveryOrchestrator>,
    config: WorkerPoolConfig,
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DeliveryWorkerPool {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>, config: WorkerPoolConfig) -> Self {
        Self { orchestrator, config, cancellation: CancellationToken::new(), handles: Vec::new() }
    }

    pub fn orchestrator(&self) -> &Arc<DeliveryOrchestrator> {
        &self.orchestrator
    }

    /// Spawn the worker tasks.
    ///
    /// # Errors
    /// Returns `WorkerError::AlreadyRunning` if the pool was already started.
    #[instrument(skip(self), fields(workers = self.config.worker_count))]
    pub fn start(&mut self) -> WorkerResult<()> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        info!("Starting delivery worker pool");
        self.cancellation = CancellationToken::new();

        for worker in 0..self.config.worker_count.max(1) {
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = self.cancellation.clone();
            let poll_interval = self.config.poll_interval;
            let backoff = self.config.error_backoff.clone();

            let handle = tokio::spawn(
                run_worker(orchestrator, poll_interval, backoff, cancel)
                    .instrument(info_span!("delivery_worker", worker)),
            );
            self.handles.push(handle);
        }

        info!(workers = self.handles.len(), "Delivery worker pool started");
        Ok(())
    }

    /// Signal every worker to stop and wait for them to finish.
    ///
    /// Workers in the middle of a delivery pass complete it first.
    ///
    /// # Errors
    /// Returns `WorkerError::NotRunning` if the pool is not started,
    /// `WorkerError::Timeout` if workers outlive the join timeout, or
    /// `WorkerError::TaskJoinFailed` if a worker panicked.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> WorkerResult<()> {
        if !self.is_running() {
            return Err(WorkerError::NotRunning);
        }

        info!("Stopping delivery worker pool");
        self.cancellation.cancel();

        let handles = std::mem::take(&mut self.handles);
        let join_timeout = self.config.join_timeout;
        let joined = tokio::time::timeout(join_timeout, join_all(handles)).await;

        let result = match joined {
            Ok(results) => match results.into_iter().find_map(Result::err) {
                None => Ok(()),
                Some(e) => {
                    warn!("Worker task panicked: {}", e);
                    Err(WorkerError::TaskJoinFailed(e.to_string()))
                }
            },
            Err(_) => {
                warn!("Worker tasks did not complete within timeout");
                Err(WorkerError::Timeout {
                    timeout_ms: u64::try_from(join_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        };

        self.cancellation = CancellationToken::new();
        if result.is_ok() {
            info!("Delivery worker pool stopped");
        }
        result
    }

    /// Returns true while worker tasks are active.
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}

impl Drop for DeliveryWorkerPool {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancellation.cancel();
        }
    }
}

/// Worker loop: wait for a job, run one delivery pass, repeat.
async fn run_worker(
    orchestrator: Arc<DeliveryOrchestrator>,
    poll_interval: Duration,
    backoff: RetryPolicy,
    cancel: CancellationToken,
) {
    let mut consecutive_errors = 0_u32;

    loop {
        let dequeued = tokio::select! {
            () = cancel.cancelled() => {
                debug!("Delivery worker cancelled");
                break;
            }
            dequeued = orchestrator.queue().dequeue_wait(poll_interval) => dequeued,
        };

        let outcome = match dequeued {
            Ok(Some(job)) => orchestrator.process_job(job).await.map(Some),
            Ok(None) => Ok(None),
            Err(QueueError::Closed) => {
                info!("Delivery queue closed; worker exiting");
                break;
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(Some(outcome)) => {
                consecutive_errors = 0;
                debug!(job_id = %outcome.job_id(), ?outcome, "Delivery pass finished");
            }
            Ok(None) => consecutive_errors = 0,
            Err(e) if e.is_closed() => {
                info!("Delivery queue closed; worker exiting");
                break;
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let delay = backoff.jittered_delay(consecutive_errors.saturating_add(1));
                error!(
                    error = %e,
                    consecutive_errors,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Delivery worker error; backing off"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
