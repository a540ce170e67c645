//! Backing stores for the delivery engine ports

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileQueueStore;
pub use memory::{MemoryDeliveryRecordRepository, MemoryQueueStore, StaticChannelPreferences};

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock time at which a job nacked now with `retry_after` turns visible
pub(crate) fn visible_at(retry_after: Duration) -> Option<DateTime<Utc>> {
    if retry_after.is_zero() {
        return None;
    }
    chrono::Duration::from_std(retry_after).ok().map(|delay| Utc::now() + delay)
}
