//! Async job tracking.
//!
//! Podcast generation takes minutes, so the tool hands back a job id at once
//! and the work continues in a background task. The registry here owns every
//! job record for the life of the process; nothing is evicted.

pub mod wait;

pub use wait::{CompletionGuard, WaitCoordinator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::storage::StoredArtifact;

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for file names and log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "podcast-generation")]
    PodcastGeneration,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PodcastGeneration => "podcast-generation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Edges allowed in the lifecycle DAG. `pending -> failed` covers a
    /// runner that dies before it could report `running`.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked generation request, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Local path or `gs://bucket/key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Best single retrieval URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Stable route through this server's download gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    fn new(kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            path: None,
            url: None,
            download_url: None,
            signed_url: None,
            error: None,
        }
    }
}

/// A status change plus the fields that belong to it.
///
/// Only constructible through [`JobPatch::running`], [`JobPatch::succeeded`]
/// and [`JobPatch::failed`], so artifact fields only ever arrive with
/// `succeeded` and `error` only with `failed`.
#[derive(Debug, Clone)]
pub struct JobPatch {
    status: JobStatus,
    path: Option<String>,
    url: Option<String>,
    download_url: Option<String>,
    signed_url: Option<String>,
    error: Option<String>,
}

impl JobPatch {
    fn bare(status: JobStatus) -> Self {
        Self {
            status,
            path: None,
            url: None,
            download_url: None,
            signed_url: None,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self::bare(JobStatus::Running)
    }

    pub fn succeeded(artifact: &StoredArtifact) -> Self {
        Self {
            path: Some(artifact.locator.to_string()),
            url: artifact.best_url(),
            download_url: artifact.download_url.clone(),
            signed_url: artifact.signed_url.clone(),
            ..Self::bare(JobStatus::Succeeded)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(JobStatus::Failed)
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }
}

/// Counts by status, for health and periodic stats logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStoreStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// In-process job table. Shared behind an `Arc`; the lock is only held for
/// a single map operation and never across an `.await`.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        // A panic while holding the lock cannot leave a half-written Job,
        // every mutation is a single assignment.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new `pending` job.
    pub fn create(&self, kind: JobKind) -> Job {
        let job = Job::new(kind);
        self.lock().insert(job.id.clone(), job.clone());

        tracing::info!(job.id = %job.id, job.kind = kind.as_str(), "Job created");
        job
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Apply a patch. Returns the resulting record, or `None` for an unknown id.
    ///
    /// Terminal states are sticky: a patch that does not follow a lifecycle
    /// edge is dropped with a warning and the current record is returned.
    pub fn update(&self, id: &JobId, patch: JobPatch) -> Option<Job> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id)?;

        if !job.status.can_advance_to(patch.status) {
            tracing::warn!(
                job.id = %id,
                job.status = %job.status,
                job.rejected_status = %patch.status,
                "Ignoring job update that would move against the lifecycle"
            );
            return Some(job.clone());
        }

        let previous = job.status;
        job.status = patch.status;
        job.path = patch.path;
        job.url = patch.url;
        job.download_url = patch.download_url;
        job.signed_url = patch.signed_url;
        job.error = patch.error;
        job.updated_at = Utc::now();

        let elapsed_ms = (job.updated_at - job.created_at).num_milliseconds();
        match job.status {
            JobStatus::Failed => tracing::error!(
                job.id = %id,
                job.previous = %previous,
                job.elapsed_ms = elapsed_ms,
                job.error = job.error.as_deref().unwrap_or_default(),
                "Job failed"
            ),
            status => tracing::info!(
                job.id = %id,
                job.previous = %previous,
                job.status = %status,
                job.elapsed_ms = elapsed_ms,
                "Job updated"
            ),
        }

        Some(job.clone())
    }

    /// Snapshot of every job, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn stats(&self) -> JobStoreStats {
        let jobs = self.lock();
        let mut stats = JobStoreStats::default();

        for job in jobs.values() {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        stats
    }
}
