//! Port interfaces for notification delivery

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastbreak_domain::{
    Channel, DeliveryRecord, JobId, NotificationJob, NotificationType, Result,
};
use serde::{Deserialize, Serialize};

use super::errors::DeliveryError;

/// Transport for one delivery channel
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel this adapter delivers to
    fn channel(&self) -> Channel;

    /// Deliver the notification
    ///
    /// Return [`DeliveryError::Transient`] for failures worth another pass and
    /// [`DeliveryError::Permanent`] for failures that never will be.
    async fn deliver(&self, job: &NotificationJob) -> std::result::Result<(), DeliveryError>;
}

/// A job as persisted by a [`QueueStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: NotificationJob,
    /// Earliest time the job may be dispatched; `None` means immediately
    pub not_before: Option<DateTime<Utc>>,
}

/// Durable backing store for the delivery queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a newly queued job
    async fn enqueue(&self, job: &NotificationJob, not_before: Option<DateTime<Utc>>) -> Result<()>;

    /// Remove a job that will not be dispatched again
    async fn ack(&self, job_id: JobId) -> Result<()>;

    /// Return an in-flight job to the pending set with its updated state,
    /// visible again after `retry_after`
    async fn nack(&self, job: &NotificationJob, retry_after: Duration) -> Result<()>;

    /// Every job not yet acked, for reloading after a restart
    async fn load_pending(&self) -> Result<Vec<StoredJob>>;
}

/// Append-only delivery audit log
#[async_trait]
pub trait DeliveryRecordRepository: Send + Sync {
    async fn append(&self, record: &DeliveryRecord) -> Result<()>;

    /// Records for a job, oldest first
    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<DeliveryRecord>>;
}

/// Per-user channel preferences
#[async_trait]
pub trait ChannelPreferences: Send + Sync {
    /// Channels a user wants for this kind of notification. `Persistent` is
    /// added by the caller whatever this returns.
    async fn channels_for(
        &self,
        user_id: &str,
        notification_type: NotificationType,
    ) -> Result<Vec<Channel>>;
}
