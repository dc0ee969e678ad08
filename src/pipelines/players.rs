//! `sync_players`: player bios, linked to their current team

use async_trait::async_trait;
use serde_json::{json, Value};

use super::teams::numeric_or_text;
use super::transform::{
    calendar_date, experience_years, field, height_inches, integer, jersey_number, split_name, text,
};
use super::{items_from_list, SyncPipeline, WorkItem};
use crate::error::SyncError;
use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::sync::provider::{Entity, EntityKind, Query};
use crate::sync::SyncContext;

pub struct PlayersPipeline;

#[async_trait]
impl SyncPipeline for PlayersPipeline {
    fn job_type(&self) -> &'static str {
        "sync_players"
    }

    fn collection(&self) -> &'static str {
        EntityKind::Player.collection()
    }

    fn conflict_keys(&self) -> Vec<String> {
        vec!["nba_player_id".to_string()]
    }

    fn identity_kind(&self) -> Option<EntityKind> {
        Some(EntityKind::Player)
    }

    async fn plan(&self, ctx: &SyncContext, params: &JobParams) -> Result<Vec<WorkItem>, SyncError> {
        let players = ctx.fetch_list(EntityKind::Player, &params.query()).await?;
        Ok(items_from_list(
            players,
            &["id", "player_id", "person_id"],
            &["full_name", "display_name", "name"],
        ))
    }

    async fn process(
        &self,
        ctx: &SyncContext,
        item: &WorkItem,
        _params: &JobParams,
    ) -> Result<Vec<Row>, SyncError> {
        let detail = ctx
            .fetch_detail(EntityKind::Player, &item.key, &Query::new())
            .await?;

        // A player without a known team is still stored, unattached
        let team_id = match text(&detail, &["team_id"]).or_else(|| text(&item.entity, &["team_id"])) {
            Some(external) if external != "0" => ctx.resolve_id(EntityKind::Team, &external).await?,
            _ => None,
        };

        Ok(vec![player_row(&item.key, &detail, team_id)?])
    }
}

fn player_row(external: &str, detail: &Entity, team_id: Option<i64>) -> Result<Row, SyncError> {
    let full_name = text(detail, &["full_name", "display_name", "name"]);
    let (split_first, split_last) = full_name
        .as_deref()
        .map(split_name)
        .unwrap_or_default();
    let first_name = text(detail, &["first_name"]).unwrap_or(split_first);
    let last_name = text(detail, &["last_name"]).unwrap_or(split_last);

    if first_name.is_empty() && last_name.is_empty() {
        return Err(SyncError::Transform(format!("player {} has no name", external)));
    }

    let row = json!({
        "nba_player_id": numeric_or_text(external),
        "first_name": first_name,
        "last_name": last_name,
        "team_id": team_id,
        "jersey_number": text(detail, &["jersey", "jersey_number"]).and_then(|j| jersey_number(&j)),
        "position": text(detail, &["position"]),
        "height_inches": text(detail, &["height"]).and_then(|h| height_inches(&h)),
        "weight_lbs": integer(detail, &["weight", "weight_lbs"]),
        "birth_date": text(detail, &["birth_date", "birthdate"]).and_then(|d| calendar_date(&d)),
        "country": text(detail, &["country"]),
        "experience_years": text(detail, &["experience", "season_exp"]).and_then(|e| experience_years(&e)),
        "is_active": field(detail, &["is_active", "active"]).map_or(Value::Bool(true), active_flag),
    });

    match row {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::Transform(format!("player {} row is not an object", external))),
    }
}

fn active_flag(value: &Value) -> Value {
    let active = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "active" | "y"),
        _ => true,
    };
    Value::Bool(active)
}
