//! Queue lifecycle management.
//!
//! Safe, introspectable control over the external async job backend. The
//! manager never caches job state across calls, and never removes in-flight
//! work: `remove_job` on an active job is a no-op returning `false`, so two
//! admins racing on the same job cannot lose or duplicate it. "Not found"
//! and "is active" are ordinary results, not errors; bulk operations report
//! aggregate counts and never abort on a single item.

pub mod backend;

pub use backend::{
    InMemoryJobBackend, Job, JobBackend, JobCounts, JobStatus, QueueError, QueueResult,
    SharedJobBackend,
};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{RouterEvent, SharedEventBus};

/// Hard cap on job listings, whatever the caller asks for.
const MAX_JOB_LISTING: usize = 500;

/// Failed-job backlog above which the queue is reported unhealthy.
const FAILED_BACKLOG_THRESHOLD: u64 = 10;

/// Waiting-job backlog above which the queue is reported unhealthy.
const WAITING_BACKLOG_THRESHOLD: u64 = 100;

/// Default age for [`QueueManager::clean_old_jobs`].
const DEFAULT_COMPLETED_RETENTION_HOURS: i64 = 24;

/// Default age for [`QueueManager::clean_failed_jobs`].
const DEFAULT_FAILED_RETENTION_DAYS: i64 = 7;

/// Counts by status plus the intake gate, for dashboards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Health verdict with the conditions that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
}

/// Lifecycle controller over a [`JobBackend`].
pub struct QueueManager {
    backend: SharedJobBackend,
    events: Option<SharedEventBus>,
}

impl QueueManager {
    pub fn new(backend: SharedJobBackend) -> Self {
        Self {
            backend,
            events: None,
        }
    }

    /// Attach an event bus for queue lifecycle notifications.
    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, event: RouterEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Counts by status plus the paused flag.
    pub async fn queue_stats(&self) -> QueueResult<QueueStats> {
        let counts = self.backend.counts().await?;
        let paused = self.backend.is_paused().await?;
        Ok(QueueStats {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
            paused,
        })
    }

    /// Bounded listing of jobs in the given status.
    pub async fn jobs(&self, status: JobStatus, limit: usize) -> QueueResult<Vec<Job>> {
        self.backend.list(status, limit.min(MAX_JOB_LISTING)).await
    }

    /// Re-enqueue a job. `false` when the job does not exist.
    pub async fn retry_job(&self, id: &str) -> QueueResult<bool> {
        let retried = self.backend.retry(id).await?;
        if retried {
            info!(job = id, "job re-enqueued");
            self.publish(RouterEvent::JobRetried {
                job_id: id.to_string(),
                timestamp: Utc::now(),
            });
        } else {
            debug!(job = id, "retry skipped, job not found");
        }
        Ok(retried)
    }

    /// Remove a job. `false` when the job does not exist **or** is active:
    /// in-flight work is never removed.
    pub async fn remove_job(&self, id: &str) -> QueueResult<bool> {
        match self.backend.state_of(id).await? {
            None => {
                debug!(job = id, "removal skipped, job not found");
                Ok(false)
            }
            Some(JobStatus::Active) => {
                debug!(job = id, "removal refused, job is active");
                Ok(false)
            }
            Some(_) => {
                let removed = self.backend.remove(id).await?;
                if removed {
                    info!(job = id, "job removed");
                    self.publish(RouterEvent::JobRemoved {
                        job_id: id.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Ok(removed)
            }
        }
    }

    /// Delete completed jobs settled longer ago than `older_than`
    /// (default 24h). Returns the number removed.
    pub async fn clean_old_jobs(&self, older_than: Option<Duration>) -> QueueResult<u64> {
        let age = older_than.unwrap_or_else(|| Duration::hours(DEFAULT_COMPLETED_RETENTION_HOURS));
        let removed = self.backend.clean(age, JobStatus::Completed).await?;
        if removed > 0 {
            info!(removed, "completed jobs cleaned");
            self.publish(RouterEvent::JobsCleaned {
                removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Delete failed jobs settled longer ago than `older_than`
    /// (default 7d). Returns the number removed.
    pub async fn clean_failed_jobs(&self, older_than: Option<Duration>) -> QueueResult<u64> {
        let age = older_than.unwrap_or_else(|| Duration::days(DEFAULT_FAILED_RETENTION_DAYS));
        let removed = self.backend.clean(age, JobStatus::Failed).await?;
        if removed > 0 {
            info!(removed, "failed jobs cleaned");
            self.publish(RouterEvent::JobsCleaned {
                removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Close the intake gate.
    pub async fn pause_queue(&self) -> QueueResult<()> {
        self.backend.pause().await?;
        info!("queue paused");
        self.publish(RouterEvent::QueuePaused {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Reopen the intake gate.
    pub async fn resume_queue(&self) -> QueueResult<()> {
        self.backend.resume().await?;
        info!("queue resumed");
        self.publish(RouterEvent::QueueResumed {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Retry up to `limit` failed jobs. One job failing to retry does not
    /// abort the batch; returns how many were re-enqueued.
    pub async fn retry_all_failed(&self, limit: usize) -> QueueResult<u64> {
        let failed = self.jobs(JobStatus::Failed, limit).await?;
        let mut retried = 0;
        for job in failed {
            match self.retry_job(&job.id).await {
                Ok(true) => retried += 1,
                Ok(false) => {}
                Err(e) => warn!(job = %job.id, "retry failed: {}", e),
            }
        }
        Ok(retried)
    }

    /// Retry each listed job, skipping failures. Returns the success count.
    pub async fn bulk_retry(&self, ids: &[String]) -> QueueResult<u64> {
        let mut retried = 0;
        for id in ids {
            match self.retry_job(id).await {
                Ok(true) => retried += 1,
                Ok(false) => {}
                Err(e) => warn!(job = %id, "bulk retry item failed: {}", e),
            }
        }
        Ok(retried)
    }

    /// Remove each listed job, skipping failures and active jobs. Returns
    /// the success count.
    pub async fn bulk_remove(&self, ids: &[String]) -> QueueResult<u64> {
        let mut removed = 0;
        for id in ids {
            match self.remove_job(id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(job = %id, "bulk remove item failed: {}", e),
            }
        }
        Ok(removed)
    }

    /// Health verdict: unhealthy on a failed backlog, a waiting backlog, or
    /// a paused queue, with every triggered condition listed.
    pub async fn health_status(&self) -> QueueResult<QueueHealth> {
        let stats = self.queue_stats().await?;
        let mut issues = Vec::new();
        if stats.failed > FAILED_BACKLOG_THRESHOLD {
            issues.push(format!(
                "failed backlog: {} jobs (threshold {})",
                stats.failed, FAILED_BACKLOG_THRESHOLD
            ));
        }
        if stats.waiting > WAITING_BACKLOG_THRESHOLD {
            issues.push(format!(
                "waiting backlog: {} jobs (threshold {})",
                stats.waiting, WAITING_BACKLOG_THRESHOLD
            ));
        }
        if stats.paused {
            issues.push("queue is paused".to_string());
        }
        Ok(QueueHealth {
            healthy: issues.is_empty(),
            issues,
        })
    }

    /// Whether a waiting or active job already carries this task id in its
    /// payload, so callers can avoid enqueuing duplicate work.
    pub async fn check_duplicate_job(&self, task_id: &str) -> QueueResult<bool> {
        for status in [JobStatus::Waiting, JobStatus::Active] {
            let jobs = self.backend.list(status, MAX_JOB_LISTING).await?;
            if jobs
                .iter()
                .any(|j| j.payload.get("task_id").and_then(|v| v.as_str()) == Some(task_id))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
