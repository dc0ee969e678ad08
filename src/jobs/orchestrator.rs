//! Job orchestrator
//!
//! Starts jobs on background supervisors and answers status queries. A
//! supervisor plans the job's work, runs it batch by batch through
//! [`run_batch`], persists each batch's rows, and publishes progress after
//! every batch. Callers only ever see snapshots.
//!
//! A composite job runs its stages one after another under the same id and
//! stop signal. A stage whose required stages did not complete is skipped.
//!
//! Lifecycle: `Queued -> Running -> Completed | Failed | Cancelled`. A
//! supervisor that dies before reaching a terminal status leaves the job
//! Failed rather than Running.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::error::JobError;
use crate::jobs::batch::{run_batch, BatchLimits, UnitOutcome};
use crate::jobs::model::{JobParams, JobResult, JobStatus, StageStatus, StageSummary, SyncJob};
use crate::jobs::registry::JobRegistry;
use crate::persistence::{natural_key, Row};
use crate::pipelines::{default_composites, default_pipelines, CompositeJob, Stage, SyncPipeline, WorkItem};
use crate::sync::SyncContext;

pub struct JobOrchestrator {
    registry: Arc<JobRegistry>,
    pipelines: HashMap<&'static str, Arc<dyn SyncPipeline>>,
    composites: HashMap<&'static str, Vec<Stage>>,
    ctx: Arc<SyncContext>,
    config: JobsConfig,
}

impl JobOrchestrator {
    /// Orchestrator with every built-in pipeline and composite job
    pub fn new(ctx: Arc<SyncContext>, config: JobsConfig) -> Self {
        Self::with_pipelines(ctx, config, default_pipelines()).with_composites(default_composites())
    }

    pub fn with_pipelines(
        ctx: Arc<SyncContext>,
        config: JobsConfig,
        pipelines: Vec<Arc<dyn SyncPipeline>>,
    ) -> Self {
        let pipelines = pipelines.into_iter().map(|p| (p.job_type(), p)).collect();
        Self {
            registry: Arc::new(JobRegistry::new()),
            pipelines,
            composites: HashMap::new(),
            ctx,
            config,
        }
    }

    /// Add composite job types built from the registered pipelines
    pub fn with_composites(mut self, composites: Vec<CompositeJob>) -> Self {
        for composite in composites {
            self.composites.insert(composite.job_type, composite.stages);
        }
        self
    }

    /// Job types this orchestrator accepts
    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self
            .pipelines
            .keys()
            .chain(self.composites.keys())
            .copied()
            .collect();
        types.sort_unstable();
        types
    }

    fn stages_for(&self, job_type: &str) -> Result<Vec<JobStage>, JobError> {
        if let Some(pipeline) = self.pipelines.get(job_type) {
            return Ok(vec![JobStage {
                pipeline: pipeline.clone(),
                requires: &[],
            }]);
        }

        let stages = self
            .composites
            .get(job_type)
            .ok_or_else(|| JobError::UnknownJobType(job_type.to_string()))?;
        stages
            .iter()
            .map(|stage| {
                let pipeline = self
                    .pipelines
                    .get(stage.job_type)
                    .cloned()
                    .ok_or_else(|| JobError::UnknownJobType(stage.job_type.to_string()))?;
                Ok(JobStage {
                    pipeline,
                    requires: stage.requires,
                })
            })
            .collect()
    }

    /// Register a job and run it in the background
    ///
    /// Returns the job id as soon as the job is Queued.
    pub fn start_job(&self, job_type: &str, params: JobParams) -> Result<String, JobError> {
        let stages = self.stages_for(job_type)?;

        let job_id = format!("{}_{}", job_type, Uuid::new_v4().simple());
        let cancel = CancellationToken::new();
        self.registry
            .insert(SyncJob::new(job_id.clone(), job_type, params.clone()), cancel.clone());

        info!(job_id = %job_id, job_type = %job_type, "Job queued");

        let supervisor = Supervisor {
            job_id: job_id.clone(),
            registry: self.registry.clone(),
            stages,
            ctx: self.ctx.clone(),
            config: self.config.clone(),
            params: Arc::new(params),
            cancel,
        };
        tokio::spawn(supervisor.run());

        Ok(job_id)
    }

    /// Snapshot of one job
    pub fn get_status(&self, job_id: &str) -> Option<SyncJob> {
        self.registry.snapshot(job_id)
    }

    /// Snapshots of every retained job
    pub fn list_jobs(&self) -> HashMap<String, SyncJob> {
        self.registry.list()
    }

    /// Ask a running job to stop
    ///
    /// The job stops at its next batch boundary and ends Cancelled. Returns
    /// false when the job is unknown or not running.
    pub fn request_stop(&self, job_id: &str) -> bool {
        let stopped = self.registry.request_stop(job_id);
        if stopped {
            info!(job_id = %job_id, "Stop requested");
        }
        stopped
    }

    /// Drop terminal jobs that finished more than `max_age` ago
    pub fn cleanup_completed_jobs(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.registry.remove_finished_before(cutoff);
        if removed > 0 {
            info!(removed, "Removed finished jobs");
        }
        removed
    }

    /// Drop cached provider responses whose key contains `pattern`, or all of them
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        let removed = self.ctx.cache().clear(pattern);
        info!(pattern = ?pattern, removed, "Cache cleared");
        removed
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Poll until the job reaches a terminal status
    pub async fn wait_for(&self, job_id: &str, poll: Duration) -> Option<SyncJob> {
        loop {
            let job = self.get_status(job_id)?;
            if job.is_terminal() {
                return Some(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Periodically sweep expired cache entries and old jobs until `shutdown`
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Janitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let expired = orchestrator.ctx.cache().purge_expired();
                        let jobs = orchestrator.cleanup_completed_jobs(orchestrator.config.retention());
                        debug!(expired, jobs, "Janitor pass complete");
                    }
                }
            }
        })
    }
}

/// Forwards an outside stop signal to one job
///
/// A signal that arrives while the job is still queued stays pending and is
/// delivered by a later [`StopRelay::retry`].
#[derive(Debug, Default)]
pub struct StopRelay {
    pending: bool,
    delivered: bool,
}

impl StopRelay {
    /// Record a stop signal and try to deliver it; true once delivered
    pub fn request(&mut self, orchestrator: &JobOrchestrator, job_id: &str) -> bool {
        self.pending = true;
        self.retry(orchestrator, job_id)
    }

    /// Deliver a pending signal; true once delivered
    pub fn retry(&mut self, orchestrator: &JobOrchestrator, job_id: &str) -> bool {
        if self.pending && !self.delivered {
            self.delivered = orchestrator.request_stop(job_id);
        }
        self.delivered
    }

    /// Signal received but not yet accepted by the job
    pub fn is_pending(&self) -> bool {
        self.pending && !self.delivered
    }
}

/// Pipeline run as one step of a job
struct JobStage {
    pipeline: Arc<dyn SyncPipeline>,
    requires: &'static [&'static str],
}

/// Runs one job to a terminal status
struct Supervisor {
    job_id: String,
    registry: Arc<JobRegistry>,
    stages: Vec<JobStage>,
    ctx: Arc<SyncContext>,
    config: JobsConfig,
    params: Arc<JobParams>,
    cancel: CancellationToken,
}

/// How the batch loop ended
enum Ending {
    Finished(JobResult),
    Stopped(JobResult),
}

/// How one stage's batches ended
enum StageEnd {
    Finished,
    Stopped,
}

impl Supervisor {
    async fn run(self) {
        if !self.registry.mark_running(&self.job_id) {
            warn!(job_id = %self.job_id, "Job was not queued, not running it");
            return;
        }
        self.log_state().await;

        let job_id = self.job_id.clone();
        let registry = self.registry.clone();
        let ctx = self.ctx.clone();
        let this = Arc::new(self);

        // Isolated so a panic anywhere in the job still finishes it
        let worker = tokio::spawn({
            let this = this.clone();
            async move { this.execute().await }
        });

        let (status, result, message, error) = match worker.await {
            Ok(Ok(Ending::Finished(result))) => this.judge(result),
            Ok(Ok(Ending::Stopped(result))) => {
                info!(job_id = %job_id, "Job cancelled");
                (JobStatus::Cancelled, Some(result), "Cancelled".to_string(), None)
            }
            Ok(Err(e)) => {
                error!(job_id = %job_id, error = %e, "Job failed");
                (JobStatus::Failed, None, format!("Failed: {}", e), Some(e.to_string()))
            }
            Err(join_error) => {
                let e = JobError::Panicked(join_error.to_string());
                error!(job_id = %job_id, error = %e, "Job supervisor panicked");
                (JobStatus::Failed, None, format!("Failed: {}", e), Some(e.to_string()))
            }
        };

        if let Some(job) = registry.finish(&job_id, status, result, message, error) {
            if let Err(e) = ctx.gateway().log_job(&job).await {
                warn!(job_id = %job_id, error = %e, "Failed to write sync log");
            }
        }
    }

    async fn execute(&self) -> Result<Ending, JobError> {
        let mut result = JobResult::default();
        let stage_count = self.stages.len();
        let mut completed: Vec<&'static str> = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            let job_type = stage.pipeline.job_type();
            if self.cancel.is_cancelled() {
                return Ok(Ending::Stopped(result));
            }

            if let Some(missing) = stage.requires.iter().find(|required| !completed.contains(*required)) {
                warn!(job_id = %self.job_id, stage = job_type, requires = *missing, "Skipping stage");
                result.stages.push(
                    StageSummary::new(job_type, StageStatus::Skipped)
                        .with_message(format!("{} did not complete", missing)),
                );
                self.publish(index, 100, format!("{}: skipped", job_type), &result);
                continue;
            }

            let (succeeded_before, failed_before) = (result.success_count, result.failure_count);
            let ended = self.run_stage(index, &stage.pipeline, &mut result).await;

            let mut summary = StageSummary::new(job_type, StageStatus::Completed);
            summary.success_count = result.success_count - succeeded_before;
            summary.failure_count = result.failure_count - failed_before;

            match ended {
                Ok(StageEnd::Finished) => {
                    if self.exceeds_failure_ratio(summary.success_count, summary.failure_count) {
                        summary.status = StageStatus::Failed;
                    } else {
                        completed.push(job_type);
                    }
                }
                Ok(StageEnd::Stopped) => {
                    if stage_count > 1 {
                        summary.status = StageStatus::Cancelled;
                        result.stages.push(summary);
                    }
                    return Ok(Ending::Stopped(result));
                }
                Err(e) if stage_count == 1 => return Err(e),
                Err(e) => {
                    error!(job_id = %self.job_id, stage = job_type, error = %e, "Stage failed");
                    summary.status = StageStatus::Failed;
                    summary.message = Some(e.to_string());
                }
            }

            if stage_count > 1 {
                info!(job_id = %self.job_id, stage = job_type, status = ?summary.status, "Stage finished");
                result.stages.push(summary);
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(Ending::Stopped(result));
        }
        Ok(Ending::Finished(result))
    }

    /// Plan one pipeline's work and run it batch by batch
    async fn run_stage(
        &self,
        stage_index: usize,
        pipeline: &Arc<dyn SyncPipeline>,
        result: &mut JobResult,
    ) -> Result<StageEnd, JobError> {
        let items = pipeline.plan(&self.ctx, &self.params).await?;
        let job_type = pipeline.job_type();

        if items.is_empty() {
            info!(job_id = %self.job_id, stage = job_type, "Nothing to sync");
            self.publish(stage_index, 100, self.stage_message(job_type, "Nothing to sync".to_string()), result);
            return Ok(StageEnd::Finished);
        }

        let batch_size = self.params.batch_size().unwrap_or(self.config.batch_size).max(1);
        let limits = BatchLimits {
            max_workers: self.params.max_workers().unwrap_or(self.config.max_workers),
            timeout: self.config.batch_timeout(),
        };
        let batches: Vec<Vec<WorkItem>> = items.chunks(batch_size).map(|c| c.to_vec()).collect();
        let total_batches = batches.len();

        info!(
            job_id = %self.job_id,
            stage = job_type,
            items = items.len(),
            batches = total_batches,
            "Planned job"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(StageEnd::Stopped);
            }

            let report = run_batch(
                pipeline.clone(),
                self.ctx.clone(),
                self.params.clone(),
                batch,
                limits,
                &self.cancel,
            )
            .await;

            if report.timed_out > 0 || report.not_started > 0 {
                warn!(
                    job_id = %self.job_id,
                    batch = index + 1,
                    timed_out = report.timed_out,
                    not_started = report.not_started,
                    "Batch hit its deadline"
                );
            }

            let failures_before = result.failure_count;
            let mut rows: Vec<Row> = Vec::new();
            let mut fetched: Vec<String> = Vec::new();
            for unit in report.units {
                match unit.outcome {
                    UnitOutcome::Success(unit_rows) => {
                        rows.extend(unit_rows);
                        fetched.push(unit.item.label);
                    }
                    UnitOutcome::Failed(message) => result.record_failure(unit.item.label, message),
                    UnitOutcome::Skipped => result.skipped_count += 1,
                }
            }

            if !fetched.is_empty() {
                self.persist(pipeline.as_ref(), rows, fetched, result).await;
            } else if result.failure_count > failures_before {
                result.batches_failed += 1;
            }

            let done = index + 1;
            let message = format!(
                "Batch {}/{}: {} ok, {} failed",
                done, total_batches, result.success_count, result.failure_count
            );
            debug!(job_id = %self.job_id, stage = job_type, "{}", message);
            self.publish(stage_index, done * 100 / total_batches, self.stage_message(job_type, message), result);

            if done < total_batches && !self.config.cooldown().is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.cooldown()) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(StageEnd::Stopped);
        }
        Ok(StageEnd::Finished)
    }

    /// Overall progress from a stage's own `0..=100`
    fn publish(&self, stage_index: usize, stage_progress: usize, message: String, result: &JobResult) {
        let progress = (stage_index * 100 + stage_progress.min(100)) / self.stages.len();
        self.registry
            .update_progress(&self.job_id, progress as u8, message, result);
    }

    fn stage_message(&self, job_type: &str, message: String) -> String {
        if self.stages.len() > 1 {
            format!("{}: {}", job_type, message)
        } else {
            message
        }
    }

    fn exceeds_failure_ratio(&self, succeeded: u64, failed: u64) -> bool {
        let processed = succeeded + failed;
        processed > 0 && failed as f64 / processed as f64 >= self.config.max_failure_ratio
    }

    /// Write one batch's rows; the batch fails as a whole if the store refuses it
    async fn persist(&self, pipeline: &dyn SyncPipeline, rows: Vec<Row>, fetched: Vec<String>, result: &mut JobResult) {
        let conflict_keys = pipeline.conflict_keys();
        let keys: Vec<Option<String>> = match pipeline.identity_kind() {
            Some(_) => rows.iter().map(|row| natural_key(row, &conflict_keys).ok()).collect(),
            None => Vec::new(),
        };

        let report = if rows.is_empty() {
            Ok(Default::default())
        } else {
            self.ctx
                .gateway()
                .batch_upsert(pipeline.collection(), rows, &conflict_keys)
                .await
        };

        match report {
            Ok(report) => {
                if let Some(kind) = pipeline.identity_kind() {
                    for (key, id) in keys.into_iter().zip(report.ids.iter()) {
                        if let Some(key) = key {
                            self.ctx.identity().set(kind, key, *id);
                        }
                    }
                }
                result.records_written += report.affected as u64;
                result.success_count += fetched.len() as u64;
                result.batches_completed += 1;
            }
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Batch write failed");
                for label in fetched {
                    result.record_failure(label, format!("persistence: {}", e));
                }
                result.batches_failed += 1;
            }
        }
    }

    /// Terminal status for a job whose batches all ran
    fn judge(&self, result: JobResult) -> (JobStatus, Option<JobResult>, String, Option<String>) {
        let failed_stages: Vec<String> = result
            .stages
            .iter()
            .filter(|stage| stage.status == StageStatus::Failed)
            .map(|stage| stage.job_type.clone())
            .collect();
        if !failed_stages.is_empty() {
            let e = JobError::StagesFailed(failed_stages);
            error!(job_id = %self.job_id, error = %e, "Job failed");
            return (JobStatus::Failed, Some(result), format!("Failed: {}", e), Some(e.to_string()));
        }

        if result.stages.is_empty() && self.exceeds_failure_ratio(result.success_count, result.failure_count) {
            let e = JobError::FailureThreshold {
                failed: result.failure_count,
                total: result.processed(),
            };
            error!(job_id = %self.job_id, error = %e, "Job failed");
            return (JobStatus::Failed, Some(result), format!("Failed: {}", e), Some(e.to_string()));
        }

        info!(
            job_id = %self.job_id,
            succeeded = result.success_count,
            failed = result.failure_count,
            records = result.records_written,
            "Job completed"
        );
        (JobStatus::Completed, Some(result), "Completed".to_string(), None)
    }

    async fn log_state(&self) {
        let Some(job) = self.registry.snapshot(&self.job_id) else {
            return;
        };
        if let Err(e) = self.ctx.gateway().log_job(&job).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to write sync log");
        }
    }
}
