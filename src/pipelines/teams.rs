//! `sync_teams`: franchise records

use async_trait::async_trait;
use serde_json::{json, Value};

use super::transform::{integer, text};
use super::{items_from_list, SyncPipeline, WorkItem};
use crate::error::SyncError;
use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::sync::provider::{Entity, EntityKind, Query};
use crate::sync::SyncContext;

const EASTERN: [&str; 15] = [
    "ATL", "BOS", "BKN", "CHA", "CHI", "CLE", "DET", "IND", "MIA", "MIL", "NYK", "ORL", "PHI", "TOR",
    "WAS",
];
const WESTERN: [&str; 15] = [
    "DAL", "DEN", "GSW", "HOU", "LAC", "LAL", "MEM", "MIN", "NOP", "OKC", "PHX", "POR", "SAC", "SAS",
    "UTA",
];

pub struct TeamsPipeline;

#[async_trait]
impl SyncPipeline for TeamsPipeline {
    fn job_type(&self) -> &'static str {
        "sync_teams"
    }

    fn collection(&self) -> &'static str {
        EntityKind::Team.collection()
    }

    fn conflict_keys(&self) -> Vec<String> {
        vec!["nba_team_id".to_string()]
    }

    fn identity_kind(&self) -> Option<EntityKind> {
        Some(EntityKind::Team)
    }

    async fn plan(&self, ctx: &SyncContext, params: &JobParams) -> Result<Vec<WorkItem>, SyncError> {
        let teams = ctx.fetch_list(EntityKind::Team, &params.query()).await?;
        Ok(items_from_list(teams, &["id", "team_id"], &["full_name", "name"]))
    }

    async fn process(
        &self,
        ctx: &SyncContext,
        item: &WorkItem,
        _params: &JobParams,
    ) -> Result<Vec<Row>, SyncError> {
        let detail = ctx
            .fetch_detail(EntityKind::Team, &item.key, &Query::new())
            .await?;
        Ok(vec![team_row(&item.key, &detail, &item.entity)])
    }
}

fn team_row(external_id: &str, detail: &Entity, listed: &Entity) -> Row {
    let pick = |names: &[&str]| text(detail, names).or_else(|| text(listed, names));

    let abbreviation = pick(&["abbreviation", "tricode"]);
    let conference = pick(&["conference"])
        .and_then(|c| normalize_conference(&c))
        .or_else(|| abbreviation.as_deref().and_then(conference_for));

    let row = json!({
        "nba_team_id": numeric_or_text(external_id),
        "name": pick(&["full_name", "name"]),
        "abbreviation": abbreviation,
        "city": pick(&["city"]),
        "nickname": pick(&["nickname"]),
        "conference": conference,
        "division": pick(&["division"]),
        "year_founded": integer(detail, &["year_founded", "founded"])
            .or_else(|| integer(listed, &["year_founded", "founded"])),
    });

    match row {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Canonical conference name
pub fn normalize_conference(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "east" | "eastern" => Some("Eastern"),
        "west" | "western" => Some("Western"),
        _ => None,
    }
}

/// Conference by team abbreviation
pub fn conference_for(abbreviation: &str) -> Option<&'static str> {
    let abbreviation = abbreviation.trim().to_ascii_uppercase();
    if EASTERN.contains(&abbreviation.as_str()) {
        Some("Eastern")
    } else if WESTERN.contains(&abbreviation.as_str()) {
        Some("Western")
    } else {
        None
    }
}

/// Ids that look numeric are stored as numbers
pub(crate) fn numeric_or_text(id: &str) -> Value {
    id.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id))
}
