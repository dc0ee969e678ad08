//! Per-job-type sync pipelines
//!
//! A pipeline plans a job's work items and turns one item into rows. The
//! orchestrator owns batching, concurrency, persistence and progress.
//!
//! A [`CompositeJob`] chains pipelines into stages that run in order under
//! one job id.

pub mod games;
pub mod player_stats;
pub mod players;
pub mod shot_charts;
pub mod teams;
pub mod transform;

pub use games::GamesPipeline;
pub use player_stats::PlayerStatsPipeline;
pub use players::PlayersPipeline;
pub use shot_charts::ShotChartsPipeline;
pub use teams::TeamsPipeline;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SyncError;
use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::sync::provider::{Entity, EntityKind};
use crate::sync::SyncContext;

/// One entity to fetch, transform and persist
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// External id of the entity
    pub key: String,
    /// Human-readable name for messages and error reports
    pub label: String,
    /// Entry from the planning list call
    pub entity: Entity,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, label: impl Into<String>, entity: Entity) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            entity,
        }
    }
}

/// Behavior of one job type
#[async_trait]
pub trait SyncPipeline: Send + Sync {
    /// Job type name accepted by `start_job`
    fn job_type(&self) -> &'static str;

    /// Collection rows are written to
    fn collection(&self) -> &'static str;

    /// Columns identifying a row in its collection
    fn conflict_keys(&self) -> Vec<String>;

    /// Kind to register in the identity map after a successful upsert,
    /// keyed by the row's natural key
    fn identity_kind(&self) -> Option<EntityKind>;

    /// Ordered list of work for a job
    async fn plan(&self, ctx: &SyncContext, params: &JobParams) -> Result<Vec<WorkItem>, SyncError>;

    /// Rows for one work item
    async fn process(
        &self,
        ctx: &SyncContext,
        item: &WorkItem,
        params: &JobParams,
    ) -> Result<Vec<Row>, SyncError>;
}

/// Every built-in pipeline
pub fn default_pipelines() -> Vec<Arc<dyn SyncPipeline>> {
    vec![
        Arc::new(TeamsPipeline),
        Arc::new(PlayersPipeline),
        Arc::new(GamesPipeline),
        Arc::new(PlayerStatsPipeline),
        Arc::new(ShotChartsPipeline),
    ]
}

/// One step of a composite job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    /// Pipeline job type run by this stage
    pub job_type: &'static str,
    /// Earlier stages that must have completed for this one to run
    pub requires: &'static [&'static str],
}

/// Job type made of other job types, run in order
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeJob {
    pub job_type: &'static str,
    pub stages: Vec<Stage>,
}

/// `sync_all`: teams, players, games, then season stats
///
/// Players and games reference teams; season stats reference players.
pub fn sync_all() -> CompositeJob {
    CompositeJob {
        job_type: "sync_all",
        stages: vec![
            Stage {
                job_type: "sync_teams",
                requires: &[],
            },
            Stage {
                job_type: "sync_players",
                requires: &["sync_teams"],
            },
            Stage {
                job_type: "sync_games",
                requires: &["sync_teams"],
            },
            Stage {
                job_type: "sync_player_stats",
                requires: &["sync_players", "sync_games"],
            },
        ],
    }
}

/// Every built-in composite job
pub fn default_composites() -> Vec<CompositeJob> {
    vec![sync_all()]
}

/// Work items from a list response, skipping entries without an id
pub(crate) fn items_from_list(entities: Vec<Entity>, id_fields: &[&str], label_fields: &[&str]) -> Vec<WorkItem> {
    entities
        .into_iter()
        .filter_map(|entity| {
            let key = transform::external_id(&entity, id_fields).ok()?;
            let label = transform::text(&entity, label_fields).unwrap_or_else(|| key.clone());
            Some(WorkItem::new(key, label, entity))
        })
        .collect()
}
