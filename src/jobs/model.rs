//! Job records and their JSON shape

use crate::sync::provider::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Allowed moves: Queued -> Running -> terminal
    ///
    /// A job that never started may still fail (its supervisor died before
    /// marking it Running).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item: String,
    pub message: String,
}

/// How one stage of a composite job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
    /// Not run because a required stage did not complete
    Skipped,
    Cancelled,
}

/// Per-stage counts of a composite job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub job_type: String,
    pub status: StageStatus,
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageSummary {
    pub fn new(job_type: impl Into<String>, status: StageStatus) -> Self {
        Self {
            job_type: job_type.into(),
            status,
            success_count: 0,
            failure_count: 0,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Aggregated outcome of a job's units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success_count: u64,
    pub failure_count: u64,
    /// Units never started because a stop was requested mid-batch
    pub skipped_count: u64,
    /// Rows acknowledged by the store
    pub records_written: u64,
    pub batches_completed: u32,
    pub batches_failed: u32,
    pub errors: Vec<ItemError>,
    /// One entry per stage; empty for single-stage jobs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageSummary>,
}

impl JobResult {
    /// Units that ran to an outcome
    pub fn processed(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn failure_ratio(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            total => self.failure_count as f64 / total as f64,
        }
    }

    pub fn record_failure(&mut self, item: impl Into<String>, message: impl Into<String>) {
        self.failure_count += 1;
        self.errors.push(ItemError {
            item: item.into(),
            message: message.into(),
        });
    }
}

/// Free-form job parameters
///
/// Engine keys (`batch_size`, `max_workers`) tune the run; everything else is
/// forwarded to the provider as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParams(Map<String, Value>);

const ENGINE_KEYS: [&str; 2] = ["batch_size", "max_workers"];

impl JobParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer parameter, accepting numbers or numeric strings
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// List parameter, accepting a JSON array or a comma separated string
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(other) => vec![value_to_string(other)],
            None => Vec::new(),
        }
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.get_u64("batch_size").map(|n| n as usize).filter(|n| *n > 0)
    }

    pub fn max_workers(&self) -> Option<usize> {
        self.get_u64("max_workers").map(|n| n as usize).filter(|n| *n > 0)
    }

    /// Provider query built from the non-engine parameters
    pub fn query(&self) -> Query {
        self.0
            .iter()
            .filter(|(key, _)| !ENGINE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// A sync job as seen by callers
///
/// Created Queued by the orchestrator, then mutated only by its supervisor
/// until it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub message: String,
    pub result: JobResult,
    pub error: Option<String>,
    pub params: JobParams,
}

impl SyncJob {
    pub fn new(id: impl Into<String>, job_type: impl Into<String>, params: JobParams) -> Self {
        let job_type = job_type.into();
        Self {
            id: id.into(),
            message: format!("Starting {}...", job_type),
            job_type,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            result: JobResult::default(),
            error: None,
            params,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
