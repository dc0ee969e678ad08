//! Sync jobs
//!
//! - [`model`]: job, status, params and result types
//! - [`registry`]: concurrent in-process job table
//! - [`batch`]: bounded worker pool for one batch
//! - [`orchestrator`]: starts, supervises and reports on jobs

pub mod batch;
pub mod model;
pub mod orchestrator;
pub mod registry;

pub use model::{ItemError, JobParams, JobResult, JobStatus, StageStatus, StageSummary, SyncJob};
pub use orchestrator::{JobOrchestrator, StopRelay};
pub use registry::JobRegistry;
