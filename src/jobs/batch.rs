//! Bounded execution of one batch of work items
//!
//! Every unit runs on its own task, at most `max_workers` at a time. The
//! caller waits for the batch up to a deadline. At the deadline, units that
//! never got a worker are abandoned without starting; units already running
//! are reported as timed out and left to finish on their own.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::pipelines::{SyncPipeline, WorkItem};
use crate::sync::SyncContext;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const ABANDONED: u8 = 2;

/// How one unit ended
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Rows ready to persist (possibly none)
    Success(Vec<Row>),
    /// Error message for the job result
    Failed(String),
    /// Not started because a stop was requested
    Skipped,
}

/// Outcome of one unit, paired with its item
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub item: WorkItem,
    pub outcome: UnitOutcome,
}

/// Everything a batch produced, in item order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub units: Vec<UnitReport>,
    /// Units still running at the deadline
    pub timed_out: usize,
    /// Units that had not started by the deadline and never will
    pub not_started: usize,
}

/// Limits for one batch run
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_workers: usize,
    pub timeout: Duration,
}

/// Run `items` through `pipeline` and wait for their outcomes
///
/// Worker panics and errors are captured per unit and never abort the
/// batch. Units check `cancel` before starting and are skipped once it
/// fires; units already running are not interrupted.
pub async fn run_batch(
    pipeline: Arc<dyn SyncPipeline>,
    ctx: Arc<SyncContext>,
    params: Arc<JobParams>,
    items: Vec<WorkItem>,
    limits: BatchLimits,
    cancel: &CancellationToken,
) -> BatchReport {
    if items.is_empty() {
        return BatchReport::default();
    }

    let total = items.len();
    let workers = limits.max_workers.min(total).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let states: Arc<Vec<AtomicU8>> = Arc::new((0..total).map(|_| AtomicU8::new(PENDING)).collect());
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, UnitOutcome)>();

    for (index, item) in items.iter().cloned().enumerate() {
        let pipeline = pipeline.clone();
        let ctx = ctx.clone();
        let params = params.clone();
        let semaphore = semaphore.clone();
        let states = states.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // Closed at the deadline
                Err(_) => return,
            };

            // Loses against the collector once the unit was abandoned
            if states[index]
                .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            let outcome = if cancel.is_cancelled() {
                UnitOutcome::Skipped
            } else {
                run_unit(pipeline.as_ref(), &ctx, &item, &params).await
            };

            // Receiver is gone once the batch deadline passed
            let _ = tx.send((index, outcome));
        });
    }
    drop(tx);

    let deadline = Instant::now() + limits.timeout;
    let mut outcomes: Vec<Option<UnitOutcome>> = (0..total).map(|_| None).collect();
    let mut received = 0;

    while received < total {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some((index, outcome))) => {
                outcomes[index] = Some(outcome);
                received += 1;
            }
            Ok(None) => break,
            Err(_) => {
                semaphore.close();
                warn!(
                    pending = total - received,
                    timeout_secs = limits.timeout.as_secs(),
                    "Batch timed out, abandoning unfinished units"
                );
                break;
            }
        }
    }

    let mut report = BatchReport::default();
    for (index, (item, outcome)) in items.into_iter().zip(outcomes).enumerate() {
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                let never_started = states[index]
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if never_started {
                    report.not_started += 1;
                    UnitOutcome::Failed(format!(
                        "not started before the {}s batch deadline",
                        limits.timeout.as_secs()
                    ))
                } else {
                    report.timed_out += 1;
                    UnitOutcome::Failed(format!("timed out after {}s", limits.timeout.as_secs()))
                }
            }
        };
        report.units.push(UnitReport { item, outcome });
    }
    report
}

async fn run_unit(
    pipeline: &dyn SyncPipeline,
    ctx: &SyncContext,
    item: &WorkItem,
    params: &JobParams,
) -> UnitOutcome {
    match AssertUnwindSafe(pipeline.process(ctx, item, params))
        .catch_unwind()
        .await
    {
        Ok(Ok(rows)) => {
            debug!(item = %item.label, rows = rows.len(), "Unit succeeded");
            UnitOutcome::Success(rows)
        }
        Ok(Err(e)) => {
            warn!(item = %item.label, error = %e, "Unit failed");
            UnitOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(item = %item.label, "Unit worker panicked");
            UnitOutcome::Failed("unit worker panicked".to_string())
        }
    }
}
