//! Shared test helpers for `fastbreak-core` integration tests.
//!
//! In-memory implementations of the delivery ports plus a scripted channel
//! adapter, so delivery tests can focus on behaviour instead of plumbing.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastbreak_core::{
    ChannelAdapter, ChannelPreferences, DeliveryError, DeliveryRecordRepository, QueueStore,
    StoredJob,
};
use fastbreak_domain::{
    Channel, DeliveryRecord, JobId, NotificationJob, NotificationType, Result as DomainResult,
};
use parking_lot::Mutex;

/// In-memory `QueueStore`
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, StoredJob>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Last persisted snapshot of a job
    pub fn stored(&self, job_id: JobId) -> Option<NotificationJob> {
        self.jobs.lock().get(&job_id).map(|stored| stored.job.clone())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(
        &self,
        job: &NotificationJob,
        not_before: Option<DateTime<Utc>>,
    ) -> DomainResult<()> {
        self.jobs.lock().insert(job.id, StoredJob { job: job.clone(), not_before });
        Ok(())
    }

    async fn ack(&self, job_id: JobId) -> DomainResult<()> {
        self.jobs.lock().remove(&job_id);
        Ok(())
    }

    async fn nack(&self, job: &NotificationJob, _retry_after: Duration) -> DomainResult<()> {
        self.jobs.lock().insert(job.id, StoredJob { job: job.clone(), not_before: None });
        Ok(())
    }

    async fn load_pending(&self) -> DomainResult<Vec<StoredJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}

/// In-memory audit log
#[derive(Default)]
pub struct MemoryRecords {
    records: Mutex<Vec<DeliveryRecord>>,
}

impl MemoryRecords {
    pub fn for_channel(&self, job_id: JobId, channel: Channel) -> Vec<DeliveryRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.job_id == job_id && record.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeliveryRecordRepository for MemoryRecords {
    async fn append(&self, record: &DeliveryRecord) -> DomainResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn list_for_job(&self, job_id: JobId) -> DomainResult<Vec<DeliveryRecord>> {
        Ok(self.records.lock().iter().filter(|record| record.job_id == job_id).cloned().collect())
    }
}

/// How a [`ScriptedAdapter`] answers once its script runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Succeed,
    FailTransient,
    FailPermanent,
}

/// Channel adapter answering from a script of outcomes
pub struct ScriptedAdapter {
    channel: Channel,
    script: Mutex<VecDeque<bool>>,
    fallback: Fallback,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    pub fn succeeding(channel: Channel) -> Arc<Self> {
        Self::new(channel, [], Fallback::Succeed)
    }

    pub fn failing(channel: Channel) -> Arc<Self> {
        Self::new(channel, [], Fallback::FailTransient)
    }

    pub fn rejecting(channel: Channel) -> Arc<Self> {
        Self::new(channel, [], Fallback::FailPermanent)
    }

    /// Fail transiently `failures` times, then succeed
    pub fn flaky(channel: Channel, failures: usize) -> Arc<Self> {
        Self::new(channel, std::iter::repeat(false).take(failures), Fallback::Succeed)
    }

    /// `true` entries succeed, `false` entries fail transiently
    pub fn new(
        channel: Channel,
        script: impl IntoIterator<Item = bool>,
        fallback: Fallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, _job: &NotificationJob) -> Result<(), DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.script.lock().pop_front();
        let fallback = match scripted {
            Some(true) => return Ok(()),
            Some(false) => Fallback::FailTransient,
            None => self.fallback,
        };
        match fallback {
            Fallback::Succeed => Ok(()),
            Fallback::FailTransient => {
                Err(DeliveryError::transient(self.channel, format!("attempt {call} refused")))
            }
            Fallback::FailPermanent => {
                Err(DeliveryError::permanent(self.channel, "recipient unreachable"))
            }
        }
    }
}

/// Fixed channel preferences for every user
pub struct FixedPreferences(pub Vec<Channel>);

#[async_trait]
impl ChannelPreferences for FixedPreferences {
    async fn channels_for(
        &self,
        _user_id: &str,
        _notification_type: NotificationType,
    ) -> DomainResult<Vec<Channel>> {
        Ok(self.0.clone())
    }
}
