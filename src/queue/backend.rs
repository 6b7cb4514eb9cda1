//! Job backend contract and in-memory reference implementation.
//!
//! The job store is owned by an external broker; the manager only inspects
//! and transitions jobs through this contract and never invents job ids.
//! The in-memory backend exists for tests and for embedding without a
//! broker; enqueue assigns v4 uuids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobStatus {
    /// All states, for iteration in counts and scans.
    pub fn all() -> &'static [JobStatus] {
        &[
            Self::Waiting,
            Self::Active,
            Self::Completed,
            Self::Failed,
            Self::Delayed,
        ]
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Delayed => write!(f, "delayed"),
        }
    }
}

/// One async job as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Completion percentage reported by the worker, 0-100.
    pub progress: u8,
    pub attempts_made: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Job {
    /// The instant age-based cleanup measures against: finish time when the
    /// job ran, enqueue time otherwise.
    pub fn settled_at(&self) -> DateTime<Utc> {
        self.finished_at.unwrap_or(self.enqueued_at)
    }
}

/// Counts per job status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Shared reference to a job backend
pub type SharedJobBackend = Arc<dyn JobBackend>;

/// Contract exposed by the external async job broker.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Counts by status.
    async fn counts(&self) -> QueueResult<JobCounts>;

    /// Jobs in the given status, at most `limit`.
    async fn list(&self, status: JobStatus, limit: usize) -> QueueResult<Vec<Job>>;

    /// A single job by id.
    async fn get(&self, id: &str) -> QueueResult<Option<Job>>;

    /// Current status of a job, if it exists.
    async fn state_of(&self, id: &str) -> QueueResult<Option<JobStatus>>;

    /// Re-enqueue a job. Returns false if the job does not exist.
    async fn retry(&self, id: &str) -> QueueResult<bool>;

    /// Remove a job unconditionally. Returns false if it does not exist.
    async fn remove(&self, id: &str) -> QueueResult<bool>;

    /// Delete jobs in `status` settled before `older_than` ago. Returns the
    /// number removed.
    async fn clean(&self, older_than: Duration, status: JobStatus) -> QueueResult<u64>;

    /// Stop accepting new work.
    async fn pause(&self) -> QueueResult<()>;

    /// Resume accepting new work.
    async fn resume(&self) -> QueueResult<()>;

    /// Whether intake is currently paused.
    async fn is_paused(&self) -> QueueResult<bool>;
}

/// In-memory job backend backed by a RwLock'd map.
#[derive(Default)]
pub struct InMemoryJobBackend {
    jobs: RwLock<HashMap<String, Job>>,
    paused: AtomicBool,
}

impl InMemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared trait-object reference to this backend.
    pub fn shared(self) -> SharedJobBackend {
        Arc::new(self)
    }

    /// Enqueue a new waiting job and return it.
    pub fn enqueue(&self, name: impl Into<String>, payload: serde_json::Value) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            status: JobStatus::Waiting,
            progress: 0,
            attempts_made: 0,
            enqueued_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            failure_reason: None,
        };
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job.clone());
        job
    }

    /// Insert or replace a job record verbatim. Test fixture hook.
    pub fn insert(&self, job: Job) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job);
    }

    /// Move a job to a new status, stamping the matching timestamp.
    pub fn set_status(&self, id: &str, status: JobStatus) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        job.status = status;
        match status {
            JobStatus::Active => {
                job.processed_at = Some(Utc::now());
                job.attempts_made += 1;
            }
            JobStatus::Completed | JobStatus::Failed => {
                job.finished_at = Some(Utc::now());
            }
            JobStatus::Waiting | JobStatus::Delayed => {}
        }
        true
    }

    /// Mark a job failed with a reason.
    pub fn fail(&self, id: &str, reason: impl Into<String>) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        job.status = JobStatus::Failed;
        job.finished_at = Some(Utc::now());
        job.failure_reason = Some(reason.into());
        true
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    async fn counts(&self) -> QueueResult<JobCounts> {
        let jobs = self.jobs.read().map_err(|_| QueueError::LockPoisoned)?;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Delayed => counts.delayed += 1,
            }
        }
        Ok(counts)
    }

    async fn list(&self, status: JobStatus, limit: usize) -> QueueResult<Vec<Job>> {
        let jobs = self.jobs.read().map_err(|_| QueueError::LockPoisoned)?;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by_key(|j| j.enqueued_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get(&self, id: &str) -> QueueResult<Option<Job>> {
        let jobs = self.jobs.read().map_err(|_| QueueError::LockPoisoned)?;
        Ok(jobs.get(id).cloned())
    }

    async fn state_of(&self, id: &str) -> QueueResult<Option<JobStatus>> {
        let jobs = self.jobs.read().map_err(|_| QueueError::LockPoisoned)?;
        Ok(jobs.get(id).map(|j| j.status))
    }

    async fn retry(&self, id: &str) -> QueueResult<bool> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(false);
        };
        job.status = JobStatus::Waiting;
        job.processed_at = None;
        job.finished_at = None;
        Ok(true)
    }

    async fn remove(&self, id: &str) -> QueueResult<bool> {
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        Ok(jobs.remove(id).is_some())
    }

    async fn clean(&self, older_than: Duration, status: JobStatus) -> QueueResult<u64> {
        let cutoff = Utc::now() - older_than;
        let mut jobs = self.jobs.write().map_err(|_| QueueError::LockPoisoned)?;
        let before = jobs.len();
        jobs.retain(|_, job| job.status != status || job.settled_at() > cutoff);
        Ok((before - jobs.len()) as u64)
    }

    async fn pause(&self) -> QueueResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> QueueResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_paused(&self) -> QueueResult<bool> {
        Ok(self.paused.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_and_counts() {
        let backend = InMemoryJobBackend::new();
        backend.enqueue("translate", serde_json::json!({ "task_id": "t1" }));
        let job = backend.enqueue("summarize", serde_json::json!({ "task_id": "t2" }));
        backend.set_status(&job.id, JobStatus::Active);

        let counts = backend.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.completed, 0);
    }

    #[tokio::test]
    async fn test_list_is_bounded_and_ordered() {
        let backend = InMemoryJobBackend::new();
        for i in 0..5 {
            backend.enqueue(format!("job-{i}"), serde_json::Value::Null);
        }
        let listed = backend.list(JobStatus::Waiting, 3).await.unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn test_retry_resets_lifecycle_timestamps() {
        let backend = InMemoryJobBackend::new();
        let job = backend.enqueue("j", serde_json::Value::Null);
        backend.set_status(&job.id, JobStatus::Active);
        backend.fail(&job.id, "worker crashed");

        assert!(backend.retry(&job.id).await.unwrap());
        let retried = backend.get(&job.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Waiting);
        assert!(retried.finished_at.is_none());
        assert_eq!(retried.attempts_made, 1);

        assert!(!backend.retry("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_respects_status_and_age() {
        let backend = InMemoryJobBackend::new();
        let old = backend.enqueue("old", serde_json::Value::Null);
        backend.set_status(&old.id, JobStatus::Completed);
        // Backdate the finish time past the cutoff.
        {
            let mut job = backend.get(&old.id).await.unwrap().unwrap();
            job.finished_at = Some(Utc::now() - Duration::hours(48));
            backend.insert(job);
        }
        let fresh = backend.enqueue("fresh", serde_json::Value::Null);
        backend.set_status(&fresh.id, JobStatus::Completed);

        let removed = backend.clean(Duration::hours(24), JobStatus::Completed).await.unwrap();
        assert_eq!(removed, 1);
        assert!(backend.get(&old.id).await.unwrap().is_none());
        assert!(backend.get(&fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let backend = InMemoryJobBackend::new();
        assert!(!backend.is_paused().await.unwrap());
        backend.pause().await.unwrap();
        assert!(backend.is_paused().await.unwrap());
        backend.resume().await.unwrap();
        assert!(!backend.is_paused().await.unwrap());
    }
}
