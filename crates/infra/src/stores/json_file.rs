//! `QueueStore` persisted as a JSON snapshot file
//!
//! Every mutation rewrites the whole snapshot: the new contents go to a
//! sibling temp file which is then renamed over the old one, so a crash
//! leaves either the previous or the next snapshot on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastbreak_core::{QueueStore, StoredJob};
use fastbreak_domain::{FastBreakError, JobId, NotificationJob, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::visible_at;
use crate::errors::InfraError;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    jobs: Vec<StoredJob>,
}

/// File-backed queue store
#[derive(Debug)]
pub struct JsonFileQueueStore {
    path: PathBuf,
    jobs: Mutex<BTreeMap<JobId, StoredJob>>,
}

impl JsonFileQueueStore {
    /// Open the store at `path`, loading the existing snapshot if there is one
    ///
    /// # Errors
    /// Returns `FastBreakError::Persistence` if the file cannot be read or
    /// holds an unsupported or corrupt snapshot.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => decode(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(InfraError::from(err).into()),
        };
        info!(pending = jobs.len(), "queue snapshot loaded");
        Ok(Self { path, jobs: Mutex::new(jobs) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Apply `change` and persist the result while still holding the lock
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<JobId, StoredJob>),
    {
        let mut jobs = self.jobs.lock().await;
        let mut next = jobs.clone();
        change(&mut next);
        self.persist(&next).await?;
        *jobs = next;
        Ok(())
    }

    async fn persist(&self, jobs: &BTreeMap<JobId, StoredJob>) -> Result<()> {
        let snapshot = Snapshot { version: SNAPSHOT_VERSION, jobs: jobs.values().cloned().collect() };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(InfraError::from)?;

        let tmp = self.temp_path();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(InfraError::from)?;
        }
        tokio::fs::write(&tmp, &bytes).await.map_err(InfraError::from)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(InfraError::from)?;

        debug!(pending = jobs.len(), bytes = bytes.len(), "queue snapshot written");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<JobId, StoredJob>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    let snapshot: Snapshot = serde_json::from_slice(bytes).map_err(InfraError::from)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(FastBreakError::Persistence(format!(
            "unsupported queue snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    Ok(snapshot.jobs.into_iter().map(|stored| (stored.job.id, stored)).collect())
}

#[async_trait]
impl QueueStore for JsonFileQueueStore {
    async fn enqueue(&self, job: &NotificationJob, not_before: Option<DateTime<Utc>>) -> Result<()> {
        let stored = StoredJob { job: job.clone(), not_before };
        self.mutate(|jobs| {
            jobs.insert(stored.job.id, stored);
        })
        .await
    }

    async fn ack(&self, job_id: JobId) -> Result<()> {
        if !self.jobs.lock().await.contains_key(&job_id) {
            return Ok(());
        }
        self.mutate(|jobs| {
            jobs.remove(&job_id);
        })
        .await
    }

    async fn nack(&self, job: &NotificationJob, retry_after: Duration) -> Result<()> {
        let stored = StoredJob { job: job.clone(), not_before: visible_at(retry_after) };
        self.mutate(|jobs| {
            jobs.insert(stored.job.id, stored);
        })
        .await
    }

    async fn load_pending(&self) -> Result<Vec<StoredJob>> {
        Ok(self.jobs.lock().await.values().cloned().collect())
    }
}
