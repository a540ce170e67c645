//! In-memory port implementations
//!
//! Nothing here survives a restart. Useful for tests, demos and deployments
//! where the queue is rebuilt from an upstream source.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastbreak_core::{ChannelPreferences, DeliveryRecordRepository, QueueStore, StoredJob};
use fastbreak_domain::{Channel, DeliveryRecord, JobId, NotificationJob, NotificationType, Result};
use parking_lot::{Mutex, RwLock};

use super::visible_at;

/// `QueueStore` holding pending jobs in a map
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    jobs: Mutex<BTreeMap<JobId, StoredJob>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn get(&self, job_id: JobId) -> Option<StoredJob> {
        self.jobs.lock().get(&job_id).cloned()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, job: &NotificationJob, not_before: Option<DateTime<Utc>>) -> Result<()> {
        self.jobs.lock().insert(job.id, StoredJob { job: job.clone(), not_before });
        Ok(())
    }

    async fn ack(&self, job_id: JobId) -> Result<()> {
        self.jobs.lock().remove(&job_id);
        Ok(())
    }

    async fn nack(&self, job: &NotificationJob, retry_after: Duration) -> Result<()> {
        let stored = StoredJob { job: job.clone(), not_before: visible_at(retry_after) };
        self.jobs.lock().insert(job.id, stored);
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<StoredJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}

/// Append-only audit log kept in memory
#[derive(Debug, Default)]
pub struct MemoryDeliveryRecordRepository {
    records: RwLock<Vec<DeliveryRecord>>,
}

impl MemoryDeliveryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Every record, in append order
    pub fn all(&self) -> Vec<DeliveryRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl DeliveryRecordRepository for MemoryDeliveryRecordRepository {
    async fn append(&self, record: &DeliveryRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<DeliveryRecord>> {
        Ok(self.records.read().iter().filter(|record| record.job_id == job_id).cloned().collect())
    }
}

/// Channel preferences from a fixed table
///
/// Lookup order: the user's own list, then the list for the notification
/// type, then the default list.
#[derive(Debug, Clone, Default)]
pub struct StaticChannelPreferences {
    default: Vec<Channel>,
    by_type: HashMap<NotificationType, Vec<Channel>>,
    by_user: HashMap<String, Vec<Channel>>,
}

impl StaticChannelPreferences {
    pub fn new(default: impl IntoIterator<Item = Channel>) -> Self {
        Self { default: default.into_iter().collect(), ..Self::default() }
    }

    pub fn with_type(
        mut self,
        notification_type: NotificationType,
        channels: impl IntoIterator<Item = Channel>,
    ) -> Self {
        self.by_type.insert(notification_type, channels.into_iter().collect());
        self
    }

    pub fn with_user(
        mut self,
        user_id: impl Into<String>,
        channels: impl IntoIterator<Item = Channel>,
    ) -> Self {
        self.by_user.insert(user_id.into(), channels.into_iter().collect());
        self
    }
}

#[async_trait]
impl ChannelPreferences for StaticChannelPreferences {
    async fn channels_for(
        &self,
        user_id: &str,
        notification_type: NotificationType,
    ) -> Result<Vec<Channel>> {
        let channels = self
            .by_user
            .get(user_id)
            .or_else(|| self.by_type.get(&notification_type))
            .unwrap_or(&self.default);
        Ok(channels.clone())
    }
}
