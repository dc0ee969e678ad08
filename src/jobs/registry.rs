//! In-process job registry
//!
//! Jobs live only as long as the process. Every mutation goes through a
//! method here, which refuses to move a job out of a terminal status.

use crate::jobs::model::{JobResult, JobStatus, SyncJob};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct JobEntry {
    job: SyncJob,
    cancel: CancellationToken,
}

/// Concurrent map of job id to job state
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: SyncJob, cancel: CancellationToken) {
        self.jobs.insert(job.id.clone(), JobEntry { job, cancel });
    }

    /// Copy of a job's current state
    pub fn snapshot(&self, id: &str) -> Option<SyncJob> {
        self.jobs.get(id).map(|entry| entry.job.clone())
    }

    /// Copies of every job's current state
    pub fn list(&self) -> HashMap<String, SyncJob> {
        self.jobs
            .iter()
            .map(|entry| (entry.key().clone(), entry.job.clone()))
            .collect()
    }

    /// Signal a running job to stop at its next check
    ///
    /// Returns false for unknown jobs and jobs that are not Running.
    pub fn request_stop(&self, id: &str) -> bool {
        match self.jobs.get(id) {
            Some(entry) if entry.job.status == JobStatus::Running => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Queued -> Running
    pub fn mark_running(&self, id: &str) -> bool {
        self.with_job(id, |job| {
            if !job.status.can_transition_to(JobStatus::Running) {
                return false;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.message = "Running...".to_string();
            true
        })
        .unwrap_or(false)
    }

    /// Publish progress and the partial result of a running job
    ///
    /// Progress never moves backwards.
    pub fn update_progress(&self, id: &str, progress: u8, message: String, result: &JobResult) {
        self.with_job(id, |job| {
            if job.status != JobStatus::Running {
                return;
            }
            job.progress = job.progress.max(progress.min(100));
            job.message = message;
            job.result = result.clone();
        });
    }

    /// Move a job into a terminal status
    ///
    /// Returns the final snapshot, or `None` when the job is unknown or
    /// already terminal.
    pub fn finish(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<JobResult>,
        message: String,
        error: Option<String>,
    ) -> Option<SyncJob> {
        self.with_job(id, |job| {
            if !status.is_terminal() || !job.status.can_transition_to(status) {
                return None;
            }
            job.status = status;
            job.completed_at = Some(Utc::now());
            job.message = message;
            job.error = error;
            if let Some(result) = result {
                job.result = result;
            }
            if status == JobStatus::Completed {
                job.progress = 100;
            }
            Some(job.clone())
        })
        .flatten()
    }

    /// Drop terminal jobs that completed before `cutoff`
    pub fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| {
            !(entry.job.is_terminal() && entry.job.completed_at.is_some_and(|at| at < cutoff))
        });
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn with_job<R>(&self, id: &str, f: impl FnOnce(&mut SyncJob) -> R) -> Option<R> {
        self.jobs.get_mut(id).map(|mut entry| f(&mut entry.job))
    }
}
