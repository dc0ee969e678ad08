//! `sync_games`: schedule and results
//!
//! The list response already carries everything a game row needs, so units
//! make no detail call. Both teams must already be known to the store.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::teams::numeric_or_text;
use super::transform::{calendar_date, integer, text};
use super::{items_from_list, SyncPipeline, WorkItem};
use crate::error::SyncError;
use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::sync::provider::{Entity, EntityKind};
use crate::sync::SyncContext;

pub struct GamesPipeline;

#[async_trait]
impl SyncPipeline for GamesPipeline {
    fn job_type(&self) -> &'static str {
        "sync_games"
    }

    fn collection(&self) -> &'static str {
        EntityKind::Game.collection()
    }

    fn conflict_keys(&self) -> Vec<String> {
        vec!["nba_game_id".to_string()]
    }

    fn identity_kind(&self) -> Option<EntityKind> {
        Some(EntityKind::Game)
    }

    async fn plan(&self, ctx: &SyncContext, params: &JobParams) -> Result<Vec<WorkItem>, SyncError> {
        let games = ctx.fetch_list(EntityKind::Game, &params.query()).await?;
        Ok(items_from_list(games, &["id", "game_id"], &["matchup", "id", "game_id"]))
    }

    async fn process(
        &self,
        ctx: &SyncContext,
        item: &WorkItem,
        _params: &JobParams,
    ) -> Result<Vec<Row>, SyncError> {
        let home = team_ref(&item.entity, &["home_team_id", "home_team"], "home")?;
        let away = team_ref(&item.entity, &["visitor_team_id", "away_team_id", "away_team"], "away")?;

        let home_id = ctx
            .resolve_id(EntityKind::Team, &home)
            .await?
            .ok_or_else(|| SyncError::Transform(format!("unknown home team {}", home)))?;
        let away_id = ctx
            .resolve_id(EntityKind::Team, &away)
            .await?
            .ok_or_else(|| SyncError::Transform(format!("unknown away team {}", away)))?;

        Ok(vec![game_row(&item.key, &item.entity, home_id, away_id)?])
    }
}

/// External team id, from a flat id field or a nested `{ "id": .. }` object
fn team_ref(game: &Entity, names: &[&str], side: &str) -> Result<String, SyncError> {
    names
        .iter()
        .find_map(|name| match game.get(*name) {
            Some(Value::Object(team)) => team.get("id").and_then(|id| match id {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            }),
            Some(_) => text(game, &[*name]),
            None => None,
        })
        .ok_or_else(|| SyncError::Transform(format!("game has no {} team", side)))
}

fn game_row(external: &str, game: &Entity, home_id: i64, away_id: i64) -> Result<Row, SyncError> {
    let game_date = text(game, &["date", "game_date"])
        .and_then(|d| calendar_date(&d))
        .ok_or_else(|| SyncError::Transform(format!("game {} has no date", external)))?;

    let home_score = integer(game, &["home_team_score", "home_score"]);
    let away_score = integer(game, &["visitor_team_score", "away_team_score", "away_score"]);
    let status = match text(game, &["status"]) {
        Some(s) if s.eq_ignore_ascii_case("final") => "final",
        _ if home_score.unwrap_or(0) > 0 && away_score.unwrap_or(0) > 0 => "final",
        _ => "scheduled",
    };

    let row = json!({
        "nba_game_id": numeric_or_text(external),
        "game_date": game_date,
        "season": text(game, &["season"]),
        "home_team_id": home_id,
        "away_team_id": away_id,
        "home_score": home_score,
        "away_score": away_score,
        "status": status,
    });

    match row {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::Transform(format!("game {} row is not an object", external))),
    }
}
