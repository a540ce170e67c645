//! Notification data types shared by the delivery engine and its adapters

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::impl_name_conversions;

/// Identifier of a notification job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// New time-ordered identifier
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Delivery medium for a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// In-app notification row; always part of a job's channel set
    Persistent,
    Email,
    Push,
    Webhook,
}

impl_name_conversions!(Channel {
    Persistent => "persistent",
    Email => "email",
    Push => "push",
    Webhook => "webhook",
});

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Persistent, Channel::Email, Channel::Push, Channel::Webhook];
}

/// Priority tier; `High > Medium > Low`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl_name_conversions!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// Kind of event being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TradeExecuted,
    Opportunity,
    BudgetAlert,
    StrategyUpdate,
    System,
}

impl_name_conversions!(NotificationType {
    TradeExecuted => "trade_executed",
    Opportunity => "opportunity",
    BudgetAlert => "budget_alert",
    StrategyUpdate => "strategy_update",
    System => "system",
});

/// Per-channel delivery status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl_name_conversions!(ChannelStatus {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

/// Lifecycle of a job as a whole
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in the queue or being processed
    #[default]
    Active,
    /// Every channel is sent or permanently failed
    Completed,
    /// Retry budget exhausted with channels still failed
    Terminal,
    /// Cancelled before dispatch
    Cancelled,
}

impl_name_conversions!(JobState {
    Active => "active",
    Completed => "completed",
    Terminal => "terminal",
    Cancelled => "cancelled",
});

impl JobState {
    /// Whether the job will be processed again
    pub fn is_final(self) -> bool {
        !matches!(self, JobState::Active)
    }
}

/// Delivery detail for one channel of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub status: ChannelStatus,
    /// Attempts made on this channel
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Failed with a non-retryable error; never attempted again
    pub permanent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChannelDelivery {
    /// Whether the next pass should attempt this channel
    pub fn is_attemptable(&self) -> bool {
        match self.status {
            ChannelStatus::Pending => true,
            ChannelStatus::Failed => !self.permanent,
            ChannelStatus::Sent => false,
        }
    }

    /// Sent, or failed with no further attempts possible
    pub fn is_settled(&self) -> bool {
        self.status == ChannelStatus::Sent || (self.status == ChannelStatus::Failed && self.permanent)
    }
}

/// Caller request to send a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    /// Extra channels requested by the caller; empty defers to the user's
    /// preferences. Persistent is always added.
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NotificationRequest {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type,
            title: title.into(),
            message: message.into(),
            priority: Priority::default(),
            channels: Vec::new(),
            correlation_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A notification being driven through its channel set
///
/// The channel set is fixed at creation. `delivery_status` holds one entry
/// per channel; a channel marked sent is never attempted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: JobId,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub channels: BTreeSet<Channel>,
    pub delivery_status: BTreeMap<Channel, ChannelDelivery>,
    /// Re-enqueues consumed so far, shared across every channel of the job
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub state: JobState,
}

impl NotificationJob {
    /// Build a job from a request and its resolved channel set
    ///
    /// `Persistent` is always included, whatever `channels` contains.
    pub fn new(
        request: NotificationRequest,
        channels: impl IntoIterator<Item = Channel>,
        max_retries: u32,
    ) -> Self {
        let mut channels: BTreeSet<Channel> = channels.into_iter().collect();
        channels.insert(Channel::Persistent);
        let delivery_status =
            channels.iter().map(|channel| (*channel, ChannelDelivery::default())).collect();

        Self {
            id: JobId::new(),
            user_id: request.user_id,
            notification_type: request.notification_type,
            title: request.title,
            message: request.message,
            priority: request.priority,
            channels,
            delivery_status,
            retry_count: 0,
            max_retries,
            last_attempt_at: None,
            created_at: Utc::now(),
            correlation_id: request.correlation_id,
            metadata: request.metadata,
            state: JobState::Active,
        }
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelDelivery> {
        self.delivery_status.get(&channel)
    }

    pub fn channel_status(&self, channel: Channel) -> Option<ChannelStatus> {
        self.channel(channel).map(|delivery| delivery.status)
    }

    /// Channels the next pass should attempt: pending, or failed retryably
    pub fn attemptable_channels(&self) -> Vec<Channel> {
        self.delivery_status
            .iter()
            .filter(|(_, delivery)| delivery.is_attemptable())
            .map(|(channel, _)| *channel)
            .collect()
    }

    /// Channels that failed with a retryable error
    pub fn retryable_failures(&self) -> Vec<Channel> {
        self.delivery_status
            .iter()
            .filter(|(_, d)| d.status == ChannelStatus::Failed && !d.permanent)
            .map(|(channel, _)| *channel)
            .collect()
    }

    /// Every channel is sent or permanently failed
    pub fn is_settled(&self) -> bool {
        self.delivery_status.values().all(ChannelDelivery::is_settled)
    }

    /// Whether another re-enqueue fits in the retry budget
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record a successful delivery. Returns `false` if the channel is not
    /// part of the job or was already sent.
    pub fn mark_sent(&mut self, channel: Channel, at: DateTime<Utc>) -> bool {
        let Some(delivery) = self.delivery_status.get_mut(&channel) else {
            return false;
        };
        if delivery.status == ChannelStatus::Sent {
            return false;
        }
        delivery.status = ChannelStatus::Sent;
        delivery.attempts += 1;
        delivery.last_error = None;
        delivery.sent_at = Some(at);
        true
    }

    /// Record a failed delivery. A sent channel is never downgraded.
    pub fn mark_failed(&mut self, channel: Channel, error: impl Into<String>, permanent: bool) -> bool {
        let Some(delivery) = self.delivery_status.get_mut(&channel) else {
            return false;
        };
        if delivery.status == ChannelStatus::Sent {
            return false;
        }
        delivery.status = ChannelStatus::Failed;
        delivery.attempts += 1;
        delivery.last_error = Some(error.into());
        delivery.permanent = permanent;
        true
    }

    /// Record a rejection that did not reach the channel (e.g. open circuit):
    /// the channel stays attemptable and the attempt is not counted.
    pub fn note_skipped(&mut self, channel: Channel, reason: impl Into<String>) {
        if let Some(delivery) = self.delivery_status.get_mut(&channel) {
            if delivery.status != ChannelStatus::Sent {
                delivery.last_error = Some(reason.into());
            }
        }
    }

    /// Close out every attemptable channel as permanently failed, keeping
    /// its last error (or `reason` if it has none). Attempt counts are left
    /// alone. Returns the channels closed.
    pub fn abandon_remaining(&mut self, reason: &str) -> Vec<Channel> {
        let mut abandoned = Vec::new();
        for (channel, delivery) in &mut self.delivery_status {
            if !delivery.is_attemptable() {
                continue;
            }
            delivery.status = ChannelStatus::Failed;
            delivery.permanent = true;
            if delivery.last_error.is_none() {
                delivery.last_error = Some(reason.to_owned());
            }
            abandoned.push(*channel);
        }
        abandoned
    }

    /// Snapshot for status queries
    pub fn status(&self) -> DeliveryStatus {
        DeliveryStatus {
            job_id: self.id,
            state: self.state,
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            channels: self.delivery_status.clone(),
            last_attempt_at: self.last_attempt_at,
            created_at: self.created_at,
        }
    }
}

/// Per-channel partial results of a job, as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub channels: BTreeMap<Channel, ChannelDelivery>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryStatus {
    pub fn channel_status(&self, channel: Channel) -> Option<ChannelStatus> {
        self.channels.get(&channel).map(|delivery| delivery.status)
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }
}

/// One entry of the append-only delivery audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub channel: Channel,
    pub status: ChannelStatus,
    pub error: Option<String>,
    /// 1-based processing pass that produced this record
    pub attempt: u32,
    /// Whether a failure may be retried at job level
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn sent(job_id: JobId, channel: Channel, attempt: u32, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            channel,
            status: ChannelStatus::Sent,
            error: None,
            attempt,
            retryable: false,
            timestamp: at,
        }
    }

    pub fn failed(
        job_id: JobId,
        channel: Channel,
        attempt: u32,
        error: impl Into<String>,
        retryable: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            channel,
            status: ChannelStatus::Failed,
            error: Some(error.into()),
            attempt,
            retryable,
            timestamp: at,
        }
    }
}
