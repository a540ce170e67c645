//! Integration tests for the delivery engine
//!
//! Drives the orchestrator, queue and channel guards end to end through the
//! public API, with in-memory ports and scripted channel adapters.

mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fastbreak_core::{
    ChannelAdapter, DeliveryOrchestrator, DeliveryQueue, JobOutcome, OrchestratorError,
    QueueConfig,
};
use fastbreak_domain::{
    Channel, ChannelLimits, ChannelStatus, Config, JobId, JobState, NotificationRequest,
    NotificationType, Priority,
};
use support::{FixedPreferences, MemoryRecords, MemoryStore, ScriptedAdapter};
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(60);

struct Engine {
    orchestrator: DeliveryOrchestrator,
    records: Arc<MemoryRecords>,
    store: Arc<MemoryStore>,
}

fn config(max_retries: u32) -> Config {
    let mut config = Config::default();
    config.delivery.max_retries = max_retries;
    config.retry.base_delay_ms = 100;
    config.retry.backoff_multiplier = 2.0;
    config.retry.jitter = false;
    config.channels.default.failure_threshold = 10;
    config
}

async fn engine(config: Config, adapters: &[Arc<ScriptedAdapter>]) -> Engine {
    let store = Arc::new(MemoryStore::default());
    let records = Arc::new(MemoryRecords::default());
    let queue = Arc::new(DeliveryQueue::new(store.clone(), QueueConfig::from(&config.delivery)));
    queue.open().await.expect("open queue");

    let mut builder = DeliveryOrchestrator::builder(queue, records.clone()).config(config);
    for adapter in adapters {
        let adapter: Arc<dyn ChannelAdapter> = adapter.clone();
        builder = builder.adapter(adapter);
    }
    Engine { orchestrator: builder.build().expect("valid orchestrator"), records, store }
}

fn request(priority: Priority, channels: &[Channel]) -> NotificationRequest {
    NotificationRequest::new("user-7", NotificationType::TradeExecuted, "Purchase filled", "1 moment")
        .with_priority(priority)
        .with_channels(channels.iter().copied())
}

/// Process jobs until `job_id` reaches a final outcome
async fn drive(orchestrator: &DeliveryOrchestrator, job_id: JobId) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = orchestrator
            .process_next_wait(WAIT)
            .await
            .expect("processing succeeds")
            .expect("job still queued");
        let done = outcome.job_id() == job_id && outcome.is_final();
        outcomes.push(outcome);
        if done {
            return outcomes;
        }
    }
}

/// Validates a channel that always fails ends terminal after the budget.
///
/// # Test Steps
/// 1. Submit [persistent, email] with max_retries = 3 and email always failing
/// 2. Process until the job is final
/// 3. Verify exactly 3 re-enqueues, persistent sent once, email failed
#[tokio::test(start_paused = true)]
async fn always_failing_channel_goes_terminal_after_max_retries() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let email = ScriptedAdapter::failing(Channel::Email);
    let engine = engine(config(3), &[persistent.clone(), email.clone()]).await;

    let job_id = engine
        .orchestrator
        .submit(request(Priority::Medium, &[Channel::Email]))
        .await
        .expect("submit");
    let outcomes = drive(&engine.orchestrator, job_id).await;

    let retries = outcomes.iter().filter(|o| matches!(o, JobOutcome::Retrying { .. })).count();
    assert_eq!(retries, 3);
    assert_eq!(outcomes.last(), Some(&JobOutcome::Terminal { job_id, failed: vec![Channel::Email] }));
    assert_eq!(persistent.calls(), 1);
    assert_eq!(email.calls(), 4);

    let status = engine.orchestrator.get_status(job_id).expect("status");
    assert_eq!(status.state, JobState::Terminal);
    assert_eq!(status.retry_count, 3);
    assert_eq!(status.channel_status(Channel::Persistent), Some(ChannelStatus::Sent));
    assert_eq!(status.channel_status(Channel::Email), Some(ChannelStatus::Failed));

    let email_records = engine.records.for_channel(job_id, Channel::Email);
    assert_eq!(email_records.len(), 4);
    assert!(email_records.iter().all(|r| r.status == ChannelStatus::Failed && r.retryable));
    assert_eq!(engine.records.for_channel(job_id, Channel::Persistent).len(), 1);
    assert_eq!(engine.store.len(), 0);
}

/// Validates partial failure with recovery on a later pass.
///
/// # Test Steps
/// 1. Submit a high-priority job to [persistent, email, push]; email fails twice
/// 2. After pass 1, persistent and push are sent and email failed
/// 3. Process to completion with base = 100ms, multiplier = 2
/// 4. Verify email went failed, failed, sent and at least 300ms elapsed
#[tokio::test(start_paused = true)]
async fn flaky_channel_recovers_after_backoff() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let email = ScriptedAdapter::flaky(Channel::Email, 2);
    let push = ScriptedAdapter::succeeding(Channel::Push);
    let engine = engine(config(3), &[persistent.clone(), email.clone(), push.clone()]).await;
    let start = Instant::now();

    let job_id = engine
        .orchestrator
        .submit(request(Priority::High, &[Channel::Email, Channel::Push]))
        .await
        .expect("submit");
    let pending = engine.orchestrator.get_status(job_id).expect("status");
    assert_eq!(pending.channel_status(Channel::Email), Some(ChannelStatus::Pending));

    let first = engine.orchestrator.process_next().await.expect("process").expect("job");
    assert!(matches!(
        first,
        JobOutcome::Retrying { retry_count: 1, delay, .. } if delay == Duration::from_millis(100)
    ));
    let after_first = engine.orchestrator.get_status(job_id).expect("status");
    assert_eq!(after_first.channel_status(Channel::Persistent), Some(ChannelStatus::Sent));
    assert_eq!(after_first.channel_status(Channel::Push), Some(ChannelStatus::Sent));
    assert_eq!(after_first.channel_status(Channel::Email), Some(ChannelStatus::Failed));

    let rest = drive(&engine.orchestrator, job_id).await;
    assert_eq!(rest.last(), Some(&JobOutcome::Completed { job_id }));
    assert!(start.elapsed() >= Duration::from_millis(300));

    let statuses: Vec<_> = engine
        .records
        .for_channel(job_id, Channel::Email)
        .iter()
        .map(|record| (record.attempt, record.status))
        .collect();
    assert_eq!(
        statuses,
        vec![(1, ChannelStatus::Failed), (2, ChannelStatus::Failed), (3, ChannelStatus::Sent)]
    );
    assert_eq!(persistent.calls(), 1);
    assert_eq!(push.calls(), 1);

    let status = engine.orchestrator.get_status(job_id).expect("status");
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.retry_count, 2);
}

/// Validates strict priority without dropping low-priority work.
///
/// Assertions:
/// - While high-priority jobs keep arriving, each pass takes a high job.
/// - Once arrivals stop, the low-priority job is delivered.
#[tokio::test]
async fn low_priority_is_delayed_but_never_dropped() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let engine = engine(config(3), &[persistent]).await;
    let low = engine.orchestrator.submit(request(Priority::Low, &[])).await.expect("submit");

    for _ in 0..10 {
        let mut highs = BTreeSet::new();
        for _ in 0..2 {
            highs.insert(
                engine.orchestrator.submit(request(Priority::High, &[])).await.expect("submit"),
            );
        }
        for _ in 0..2 {
            let outcome = engine.orchestrator.process_next().await.expect("process").expect("job");
            assert!(highs.contains(&outcome.job_id()));
        }
        assert_eq!(engine.orchestrator.get_status(low).expect("status").state, JobState::Active);
    }

    let outcome = engine.orchestrator.process_next().await.expect("process");
    assert_eq!(outcome, Some(JobOutcome::Completed { job_id: low }));
    assert_eq!(engine.orchestrator.get_status(low).expect("status").state, JobState::Completed);
}

#[tokio::test]
async fn permanent_failure_is_never_retried() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let webhook = ScriptedAdapter::rejecting(Channel::Webhook);
    let engine = engine(config(3), &[persistent, webhook.clone()]).await;

    let job_id = engine
        .orchestrator
        .submit(request(Priority::Medium, &[Channel::Webhook]))
        .await
        .expect("submit");
    let outcomes = drive(&engine.orchestrator, job_id).await;

    assert_eq!(outcomes, vec![JobOutcome::Completed { job_id }]);
    assert_eq!(webhook.calls(), 1);
    let status = engine.orchestrator.get_status(job_id).expect("status");
    let detail = &status.channels[&Channel::Webhook];
    assert_eq!(detail.status, ChannelStatus::Failed);
    assert!(detail.permanent);
    assert!(!engine.records.for_channel(job_id, Channel::Webhook)[0].retryable);
}

#[tokio::test]
async fn missing_adapter_fails_channel_permanently() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let engine = engine(config(3), &[persistent]).await;

    let job_id =
        engine.orchestrator.submit(request(Priority::Low, &[Channel::Push])).await.expect("submit");
    let outcomes = drive(&engine.orchestrator, job_id).await;

    assert_eq!(outcomes, vec![JobOutcome::Completed { job_id }]);
    let status = engine.orchestrator.get_status(job_id).expect("status");
    assert!(status.channels[&Channel::Push].permanent);
}

/// Validates an open circuit fails fast without consuming retry budget.
///
/// # Test Steps
/// 1. Email breaker opens after one failure, open timeout 1s
/// 2. Pass 1 fails email and opens the circuit (retry 1, 100ms)
/// 3. Pass 2 hits the open circuit; the job is rescheduled, budget untouched
/// 4. Pass 3 runs after the open timeout; the trial call delivers
#[tokio::test(start_paused = true)]
async fn open_circuit_reschedules_without_consuming_budget() {
    let mut config = config(3);
    config.channels.overrides.insert(
        Channel::Email,
        ChannelLimits { failure_threshold: 1, open_timeout_ms: 1_000, ..ChannelLimits::default() },
    );
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let email = ScriptedAdapter::flaky(Channel::Email, 1);
    let engine = engine(config, &[persistent, email.clone()]).await;

    let job_id = engine
        .orchestrator
        .submit(request(Priority::High, &[Channel::Email]))
        .await
        .expect("submit");
    let outcomes = drive(&engine.orchestrator, job_id).await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], JobOutcome::Retrying { retry_count: 1, .. }));
    assert!(matches!(
        outcomes[1],
        JobOutcome::Rescheduled { delay, .. } if delay == Duration::from_millis(900)
    ));
    assert_eq!(outcomes[2], JobOutcome::Completed { job_id });
    assert_eq!(email.calls(), 2);
    assert_eq!(engine.orchestrator.get_status(job_id).expect("status").retry_count, 1);
}

/// Validates a terminal job leaves no channel pending.
///
/// # Test Steps
/// 1. Open the push circuit with a first job (threshold 1, 60s open timeout)
/// 2. Submit [email, push] with max_retries = 1 and email always failing
/// 3. Both passes skip push on the open circuit; pass 2 exhausts the budget
/// 4. Verify email and push are reported failed and none stays pending
#[tokio::test(start_paused = true)]
async fn terminal_job_fails_channels_skipped_by_open_circuit() {
    let mut config = config(1);
    config.channels.overrides.insert(
        Channel::Push,
        ChannelLimits { failure_threshold: 1, open_timeout_ms: 60_000, ..ChannelLimits::default() },
    );
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let email = ScriptedAdapter::failing(Channel::Email);
    let push = ScriptedAdapter::failing(Channel::Push);
    let engine = engine(config, &[persistent, email, push.clone()]).await;

    engine
        .orchestrator
        .submit(request(Priority::Low, &[Channel::Push]))
        .await
        .expect("submit circuit opener");
    let opener = engine.orchestrator.process_next().await.expect("process").expect("job");
    assert!(matches!(opener, JobOutcome::Retrying { .. }));

    let job_id = engine
        .orchestrator
        .submit(request(Priority::High, &[Channel::Email, Channel::Push]))
        .await
        .expect("submit");
    let outcomes = drive(&engine.orchestrator, job_id).await;

    assert_eq!(
        outcomes.last(),
        Some(&JobOutcome::Terminal { job_id, failed: vec![Channel::Email, Channel::Push] })
    );
    assert_eq!(push.calls(), 1);

    let status = engine.orchestrator.get_status(job_id).expect("status");
    assert_eq!(status.state, JobState::Terminal);
    assert!(status.channels.values().all(|delivery| delivery.status != ChannelStatus::Pending));
    let skipped = &status.channels[&Channel::Push];
    assert_eq!(skipped.status, ChannelStatus::Failed);
    assert!(skipped.permanent);
    assert_eq!(skipped.attempts, 0);
    assert_eq!(status.channel_status(Channel::Persistent), Some(ChannelStatus::Sent));
}

/// Validates finished statuses are dropped oldest first past the retention.
///
/// # Test Steps
/// 1. Retain 2 finished statuses; complete three jobs
/// 2. Verify the first is gone while its history remains
/// 3. Cancel a queued job and verify the second is dropped too
/// 4. Verify a queued job is never dropped
#[tokio::test]
async fn finished_statuses_are_evicted_past_retention() {
    let mut config = config(3);
    config.delivery.status_retention = 2;
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let engine = engine(config, &[persistent]).await;

    let mut completed = Vec::new();
    for _ in 0..3 {
        let job_id =
            engine.orchestrator.submit(request(Priority::High, &[])).await.expect("submit");
        let outcome = engine.orchestrator.process_next().await.expect("process");
        assert_eq!(outcome, Some(JobOutcome::Completed { job_id }));
        completed.push(job_id);
    }

    assert!(matches!(
        engine.orchestrator.get_status(completed[0]),
        Err(OrchestratorError::JobNotFound(id)) if id == completed[0]
    ));
    assert_eq!(engine.orchestrator.history(completed[0]).await.expect("history").len(), 1);
    assert!(engine.orchestrator.get_status(completed[1]).is_ok());
    assert!(engine.orchestrator.get_status(completed[2]).is_ok());

    let waiting = engine.orchestrator.submit(request(Priority::Low, &[])).await.expect("submit");
    let doomed = engine.orchestrator.submit(request(Priority::Low, &[])).await.expect("submit");
    assert!(engine.orchestrator.cancel(doomed).await.expect("cancel"));

    assert!(engine.orchestrator.get_status(completed[1]).is_err());
    assert_eq!(engine.orchestrator.get_status(doomed).expect("status").state, JobState::Cancelled);
    assert_eq!(engine.orchestrator.get_status(waiting).expect("status").state, JobState::Active);
}

/// Validates a pass that finishes after shutdown still hands the job back.
///
/// # Test Steps
/// 1. Dequeue a job to [persistent, email] and close the queue
/// 2. Process it: persistent sends, email fails
/// 3. Verify the retry is recorded, nothing is left in flight and the store
///    keeps persistent as sent
/// 4. Restart on the same store and verify only email is attempted next
#[tokio::test]
async fn pass_finishing_after_close_is_persisted() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let email = ScriptedAdapter::failing(Channel::Email);
    let engine = engine(config(3), &[persistent, email]).await;
    let job_id = engine
        .orchestrator
        .submit(request(Priority::Medium, &[Channel::Email]))
        .await
        .expect("submit");

    let queue = engine.orchestrator.queue();
    let job = queue.dequeue_next().expect("open").expect("job");
    queue.close();

    let outcome = engine.orchestrator.process_job(job).await.expect("pass settles");
    assert!(matches!(outcome, JobOutcome::Retrying { retry_count: 1, .. }));
    assert_eq!(engine.orchestrator.get_status(job_id).expect("status").retry_count, 1);
    assert_eq!(queue.stats().in_flight, 0);

    let stored = engine.store.stored(job_id).expect("job persisted");
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.channel_status(Channel::Persistent), Some(ChannelStatus::Sent));

    let restarted = DeliveryQueue::new(engine.store.clone(), QueueConfig::default());
    assert_eq!(restarted.open().await.expect("restart"), 1);
    let reloaded = restarted.dequeue_next().expect("open").expect("job");
    assert_eq!(reloaded.attemptable_channels(), vec![Channel::Email]);
}

#[tokio::test]
async fn cancelled_job_is_not_dispatched() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let engine = engine(config(3), &[persistent.clone()]).await;
    let job_id =
        engine.orchestrator.submit(request(Priority::High, &[])).await.expect("submit");

    assert!(engine.orchestrator.cancel(job_id).await.expect("cancel"));
    assert!(!engine.orchestrator.cancel(job_id).await.expect("second cancel"));
    assert_eq!(engine.orchestrator.process_next().await.expect("process"), None);
    assert_eq!(persistent.calls(), 0);
    assert_eq!(engine.orchestrator.get_status(job_id).expect("status").state, JobState::Cancelled);
}

#[tokio::test]
async fn preferences_fill_an_empty_channel_list() {
    let store = Arc::new(MemoryStore::default());
    let queue = Arc::new(DeliveryQueue::new(store, QueueConfig::default()));
    queue.open().await.expect("open");
    let orchestrator = DeliveryOrchestrator::builder(queue, Arc::new(MemoryRecords::default()))
        .preferences(Arc::new(FixedPreferences(vec![Channel::Push, Channel::Webhook])))
        .build()
        .expect("valid orchestrator");

    let job_id = orchestrator.submit(request(Priority::Low, &[])).await.expect("submit");
    let channels: Vec<_> =
        orchestrator.get_status(job_id).expect("status").channels.into_keys().collect();
    assert_eq!(channels, vec![Channel::Persistent, Channel::Push, Channel::Webhook]);

    let explicit =
        orchestrator.submit(request(Priority::Low, &[Channel::Email])).await.expect("submit");
    let channels: Vec<_> =
        orchestrator.get_status(explicit).expect("status").channels.into_keys().collect();
    assert_eq!(channels, vec![Channel::Persistent, Channel::Email]);
}

#[tokio::test]
async fn caller_api_rejects_bad_input() {
    let engine = engine(config(3), &[]).await;

    let blank = NotificationRequest::new(" ", NotificationType::System, "Maintenance", "tonight");
    assert!(matches!(
        engine.orchestrator.submit(blank).await,
        Err(OrchestratorError::InvalidRequest(_))
    ));

    let unknown = JobId::new();
    assert!(matches!(
        engine.orchestrator.get_status(unknown),
        Err(OrchestratorError::JobNotFound(id)) if id == unknown
    ));
    assert!(matches!(
        engine.orchestrator.cancel(unknown).await,
        Err(OrchestratorError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn invalid_config_is_rejected_at_build() {
    let queue = Arc::new(DeliveryQueue::new(Arc::new(MemoryStore::default()), QueueConfig::default()));
    let mut config = Config::default();
    config.retry.backoff_multiplier = 0.5;

    let result =
        DeliveryOrchestrator::builder(queue, Arc::new(MemoryRecords::default())).config(config).build();
    assert!(matches!(result, Err(OrchestratorError::Domain(_))));
}

#[tokio::test]
async fn history_and_health_cover_every_channel() {
    let persistent = ScriptedAdapter::succeeding(Channel::Persistent);
    let email = ScriptedAdapter::succeeding(Channel::Email);
    let engine = engine(config(3), &[persistent, email]).await;
    let job_id =
        engine.orchestrator.submit(request(Priority::High, &[Channel::Email])).await.expect("submit");
    drive(&engine.orchestrator, job_id).await;

    let history = engine.orchestrator.history(job_id).await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|record| record.status == ChannelStatus::Sent && record.attempt == 1));

    let health = engine.orchestrator.channel_health();
    let channels: Vec<_> = health.iter().map(|h| h.channel).collect();
    assert_eq!(channels, Channel::ALL.to_vec());
    assert!(health.iter().all(|h| h.bulkhead.active_requests == 0));
}
