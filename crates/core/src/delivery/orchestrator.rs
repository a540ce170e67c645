//! Delivery orchestrator - drives notification jobs through their channels

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fastbreak_common::error::ErrorClassification;
use fastbreak_common::resilience::{EventSink, RetryPolicy, TracingEventSink};
use fastbreak_domain::{
    Channel, Config, DeliveryRecord, DeliveryStatus, JobId, JobState, NotificationJob,
    NotificationRequest,
};
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use super::errors::{DeliveryError, OrchestratorError};
use super::guard::{ChannelGuard, ChannelHealth};
use super::ports::{ChannelAdapter, ChannelPreferences, DeliveryRecordRepository};
use super::queue::DeliveryQueue;
use super::settings::retry_policy;

/// What happened to a job after one processing pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every channel is sent or permanently failed
    Completed { job_id: JobId },
    /// Re-enqueued after a failed pass, consuming one retry
    Retrying { job_id: JobId, retry_count: u32, delay: Duration },
    /// Only open circuits failed; re-enqueued without consuming a retry
    Rescheduled { job_id: JobId, delay: Duration },
    /// Retry budget exhausted; `failed` channels will not be attempted again
    Terminal { job_id: JobId, failed: Vec<Channel> },
}

impl JobOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Completed { job_id }
            | Self::Retrying { job_id, .. }
            | Self::Rescheduled { job_id, .. }
            | Self::Terminal { job_id, .. } => *job_id,
        }
    }

    /// Whether the job will be processed again
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Terminal { .. })
    }
}

/// Builder for [`DeliveryOrchestrator`]
pub struct DeliveryOrchestratorBuilder {
    queue: Arc<DeliveryQueue>,
    records: Arc<dyn DeliveryRecordRepository>,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    preferences: Option<Arc<dyn ChannelPreferences>>,
    config: Config,
    sink: Arc<dyn EventSink>,
}

impl DeliveryOrchestratorBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register the adapter for its channel, replacing any previous one
    pub fn adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn preferences(mut self, preferences: Arc<dyn ChannelPreferences>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Sink for bulkhead and circuit breaker events
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<DeliveryOrchestrator, OrchestratorError> {
        self.config.validate()?;
        let retry_policy = retry_policy(&self.config.retry)?;

        let mut guards = BTreeMap::new();
        for channel in Channel::ALL {
            let limits = self.config.channels.for_channel(channel);
            guards.insert(channel, ChannelGuard::new(channel, limits, Arc::clone(&self.sink))?);
        }

        Ok(DeliveryOrchestrator {
            queue: self.queue,
            records: self.records,
            adapters: self.adapters,
            preferences: self.preferences,
            guards,
            retry_policy,
            max_retries: self.config.delivery.max_retries,
            jobs: RwLock::new(StatusBoard::new(self.config.delivery.status_retention)),
        })
    }
}

/// Delivers notification jobs through per-channel guards
///
/// Channels of one job are attempted concurrently; a failing channel never
/// blocks its siblings. Channels that fail retryably are carried into the
/// next pass by re-enqueueing the job, with a delay taken from the retry
/// policy, until the job's retry budget runs out.
pub struct DeliveryOrchestrator {
    queue: Arc<DeliveryQueue>,
    records: Arc<dyn DeliveryRecordRepository>,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    preferences: Option<Arc<dyn ChannelPreferences>>,
    guards: BTreeMap<Channel, ChannelGuard>,
    retry_policy: RetryPolicy,
    max_retries: u32,
    jobs: RwLock<StatusBoard>,
}

impl DeliveryOrchestrator {
    pub fn builder(
        queue: Arc<DeliveryQueue>,
        records: Arc<dyn DeliveryRecordRepository>,
    ) -> DeliveryOrchestratorBuilder {
        DeliveryOrchestratorBuilder {
            queue,
            records,
            adapters: HashMap::new(),
            preferences: None,
            config: Config::default(),
            sink: Arc::new(TracingEventSink),
        }
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Accept a notification request and queue it for delivery
    ///
    /// The channel set is fixed here: the caller's channels, or the user's
    /// preferences when the request names none, plus `Persistent`.
    #[instrument(skip_all, fields(user_id = %request.user_id, notification_type = %request.notification_type))]
    pub async fn submit(&self, request: NotificationRequest) -> Result<JobId, OrchestratorError> {
        validate_request(&request)?;
        let channels = self.resolve_channels(&request).await?;
        let job = NotificationJob::new(request, channels, self.max_retries);
        let job_id = job.id;
        let channels = job.channels.clone();

        self.jobs.write().record(job.status());
        if let Err(err) = self.queue.add(job).await {
            self.jobs.write().remove(&job_id);
            return Err(err.into());
        }

        info!(%job_id, ?channels, "notification submitted");
        Ok(job_id)
    }

    /// Per-channel partial results of a job
    ///
    /// Finished jobs stay queryable until `delivery.status_retention` newer
    /// ones have finished; after that only [`history`](Self::history) has them.
    pub fn get_status(&self, job_id: JobId) -> Result<DeliveryStatus, OrchestratorError> {
        self.jobs.read().get(&job_id).cloned().ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Cancel a job that has not been dispatched yet
    ///
    /// Returns `false` when the job is in flight or already finished.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, OrchestratorError> {
        if self.jobs.read().get(&job_id).is_none() {
            return Err(OrchestratorError::JobNotFound(job_id));
        }
        if !self.queue.cancel(job_id).await? {
            return Ok(false);
        }
        let mut jobs = self.jobs.write();
        if let Some(mut status) = jobs.get(&job_id).cloned() {
            status.state = JobState::Cancelled;
            jobs.record(status);
        }
        Ok(true)
    }

    /// Delivery audit log of a job, oldest first
    pub async fn history(&self, job_id: JobId) -> Result<Vec<DeliveryRecord>, OrchestratorError> {
        Ok(self.records.list_for_job(job_id).await?)
    }

    /// Circuit and bulkhead state of every channel
    pub fn channel_health(&self) -> Vec<ChannelHealth> {
        self.guards.values().map(ChannelGuard::health).collect()
    }

    /// Process the next visible job, if there is one
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, OrchestratorError> {
        match self.queue.dequeue_next()? {
            Some(job) => self.process_job(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process the next job, waiting up to `timeout` for one to become visible
    pub async fn process_next_wait(
        &self,
        timeout: Duration,
    ) -> Result<Option<JobOutcome>, OrchestratorError> {
        match self.queue.dequeue_wait(timeout).await? {
            Some(job) => self.process_job(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run one delivery pass over a dequeued job and hand it back to the queue
    #[instrument(
        skip_all,
        fields(
            job_id = %job.id,
            priority = %job.priority,
            correlation_id = job.correlation_id.as_deref().unwrap_or("-"),
        )
    )]
    pub async fn process_job(&self, mut job: NotificationJob) -> Result<JobOutcome, OrchestratorError> {
        let pass = job.retry_count + 1;
        let channels = job.attemptable_channels();
        debug!(pass, ?channels, "delivery pass started");

        let results = join_all(channels.iter().map(|&channel| self.attempt(channel, &job))).await;

        let now = Utc::now();
        job.last_attempt_at = Some(now);
        let mut failures = 0_usize;
        let mut open_circuits = Vec::new();

        for (channel, result) in channels.iter().copied().zip(results) {
            let record = match result {
                Ok(()) => {
                    job.mark_sent(channel, now);
                    debug!(%channel, "channel delivered");
                    DeliveryRecord::sent(job.id, channel, pass, now)
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let message = err.to_string();
                    if let DeliveryError::CircuitOpen { retry_after, .. } = err {
                        job.note_skipped(channel, message.clone());
                        open_circuits.push(retry_after);
                    } else {
                        failures += 1;
                        job.mark_failed(channel, message.clone(), !retryable);
                    }
                    warn!(%channel, error = %message, retryable, "channel delivery failed");
                    DeliveryRecord::failed(job.id, channel, pass, message, retryable, now)
                }
            };

            if let Err(err) = self.records.append(&record).await {
                warn!(%channel, error = %err, "failed to append delivery record");
            }
        }

        self.settle(job, failures, &open_circuits).await
    }

    async fn attempt(&self, channel: Channel, job: &NotificationJob) -> Result<(), DeliveryError> {
        let (Some(adapter), Some(guard)) = (self.adapters.get(&channel), self.guards.get(&channel))
        else {
            return Err(DeliveryError::permanent(channel, "no adapter registered"));
        };
        guard.run(|| adapter.deliver(job)).await
    }

    async fn settle(
        &self,
        mut job: NotificationJob,
        failures: usize,
        open_circuits: &[Duration],
    ) -> Result<JobOutcome, OrchestratorError> {
        let job_id = job.id;

        if job.is_settled() {
            job.state = JobState::Completed;
            self.record_status(&job);
            self.queue.ack(job_id).await?;
            info!(retry_count = job.retry_count, "job completed");
            return Ok(JobOutcome::Completed { job_id });
        }

        if failures == 0 {
            if let Some(retry_after) = open_circuits.iter().min().copied() {
                let delay = retry_after.max(self.retry_policy.delay_before_attempt(2));
                self.record_status(&job);
                self.queue.schedule(job, delay).await?;
                info!(delay_ms = millis(delay), "circuits open; job rescheduled");
                return Ok(JobOutcome::Rescheduled { job_id, delay });
            }
        }

        if job.has_retry_budget() {
            let delay = self.retry_policy.jittered_delay(job.retry_count + 2);
            let status = self.queue.retry(job, delay).await?;
            let retry_count = status.retry_count;
            self.jobs.write().record(status);
            info!(retry_count, delay_ms = millis(delay), "job re-enqueued");
            return Ok(JobOutcome::Retrying { job_id, retry_count, delay });
        }

        let failed = job.abandon_remaining("retry budget exhausted");
        job.state = JobState::Terminal;
        self.record_status(&job);
        self.queue.ack(job_id).await?;
        let exhausted = DeliveryError::RetryBudgetExhausted {
            job_id,
            retries: job.retry_count,
            channels: failed.clone(),
        };
        warn!(error = %exhausted, "job terminal");
        Ok(JobOutcome::Terminal { job_id, failed })
    }

    async fn resolve_channels(
        &self,
        request: &NotificationRequest,
    ) -> Result<Vec<Channel>, OrchestratorError> {
        if !request.channels.is_empty() {
            return Ok(request.channels.clone());
        }
        match &self.preferences {
            Some(preferences) => {
                Ok(preferences.channels_for(&request.user_id, request.notification_type).await?)
            }
            None => Ok(Vec::new()),
        }
    }

    fn record_status(&self, job: &NotificationJob) {
        self.jobs.write().record(job.status());
    }
}

/// Latest status per job. Finished statuses are kept up to `retain_final`,
/// dropping the oldest first; active jobs are never dropped.
struct StatusBoard {
    statuses: HashMap<JobId, DeliveryStatus>,
    finished: VecDeque<JobId>,
    retain_final: usize,
}

impl StatusBoard {
    fn new(retain_final: usize) -> Self {
        Self { statuses: HashMap::new(), finished: VecDeque::new(), retain_final }
    }

    fn get(&self, job_id: &JobId) -> Option<&DeliveryStatus> {
        self.statuses.get(job_id)
    }

    fn record(&mut self, status: DeliveryStatus) {
        let job_id = status.job_id;
        let now_final = status.state.is_final();
        let was_final = self
            .statuses
            .insert(job_id, status)
            .is_some_and(|previous| previous.state.is_final());
        if !now_final || was_final {
            return;
        }

        self.finished.push_back(job_id);
        while self.finished.len() > self.retain_final {
            if let Some(oldest) = self.finished.pop_front() {
                self.statuses.remove(&oldest);
                debug!(job_id = %oldest, "finished job status evicted");
            }
        }
    }

    fn remove(&mut self, job_id: &JobId) {
        self.statuses.remove(job_id);
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn validate_request(request: &NotificationRequest) -> Result<(), OrchestratorError> {
    if request.user_id.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest("user_id is required".into()));
    }
    if request.title.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest("title is required".into()));
    }
    Ok(())
}
