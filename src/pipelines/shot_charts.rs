//! `sync_shot_charts`: individual field goal attempts per player and season
//!
//! Params:
//! - `season`: e.g. `2024-25`; defaults to the season in progress
//! - `player_ids`: players to fetch; every listed player when absent
//! - `max_shots`: most recent shots kept per player, 500 by default
//!
//! Shots whose game or team is not in the store yet are dropped.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::player_stats::{plan_players, season_param};
use super::transform::{id_key, integer, number, text};
use super::{SyncPipeline, WorkItem};
use crate::error::SyncError;
use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::sync::provider::{Entity, EntityKind, Query};
use crate::sync::SyncContext;

const DEFAULT_MAX_SHOTS: usize = 500;

pub struct ShotChartsPipeline;

#[async_trait]
impl SyncPipeline for ShotChartsPipeline {
    fn job_type(&self) -> &'static str {
        "sync_shot_charts"
    }

    fn collection(&self) -> &'static str {
        EntityKind::ShotChart.collection()
    }

    fn conflict_keys(&self) -> Vec<String> {
        ["player_id", "game_id", "loc_x", "loc_y", "quarter", "time_remaining"]
            .iter()
            .map(|key| key.to_string())
            .collect()
    }

    fn identity_kind(&self) -> Option<EntityKind> {
        None
    }

    async fn plan(&self, ctx: &SyncContext, params: &JobParams) -> Result<Vec<WorkItem>, SyncError> {
        plan_players(ctx, params).await
    }

    async fn process(
        &self,
        ctx: &SyncContext,
        item: &WorkItem,
        params: &JobParams,
    ) -> Result<Vec<Row>, SyncError> {
        let season = season_param(params);
        let mut query = Query::new();
        query.insert("season".to_string(), season.clone());

        let chart = ctx
            .fetch_detail(EntityKind::ShotChart, &item.key, &query)
            .await?;
        let shots = shot_list(&item.key, &chart)?;
        if shots.is_empty() {
            return Ok(Vec::new());
        }

        let player_id = ctx
            .resolve_id(EntityKind::Player, &item.key)
            .await?
            .ok_or_else(|| SyncError::Transform(format!("unknown player {}", item.key)))?;

        let max_shots = params
            .get_u64("max_shots")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_SHOTS);

        let mut rows = Vec::new();
        let mut dropped = 0;
        for shot in &shots {
            if rows.len() >= max_shots {
                break;
            }

            let (Some(game), Some(team)) = (text(shot, &["game_id"]), text(shot, &["team_id"])) else {
                dropped += 1;
                continue;
            };
            let game_id = ctx.resolve_id(EntityKind::Game, &id_key(&game)).await?;
            let team_id = ctx.resolve_id(EntityKind::Team, &id_key(&team)).await?;

            match (game_id, team_id) {
                (Some(game_id), Some(team_id)) => {
                    rows.push(shot_row(player_id, game_id, team_id, &season, shot)?)
                }
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!(player = %item.key, dropped, kept = rows.len(), "Dropped shots without a known game or team");
        }
        Ok(rows)
    }
}

/// Shots from a chart response, most recent game first
///
/// Accepts a bare array or an object with a `shots` array.
fn shot_list(player: &str, chart: &Entity) -> Result<Vec<Entity>, SyncError> {
    let mut shots = match chart {
        Value::Array(shots) => shots.clone(),
        Value::Object(map) => match map.get("shots") {
            Some(Value::Array(shots)) => shots.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(SyncError::Transform(format!(
                    "shot chart for player {} has malformed shots",
                    player
                )))
            }
        },
        _ => {
            return Err(SyncError::Transform(format!(
                "shot chart for player {} is not a list",
                player
            )))
        }
    };

    shots.sort_by(|a, b| text(b, &["game_date"]).cmp(&text(a, &["game_date"])));
    Ok(shots)
}

fn shot_row(player_id: i64, game_id: i64, team_id: i64, season: &str, shot: &Entity) -> Result<Row, SyncError> {
    let made = integer(shot, &["shot_made_flag", "made"]).unwrap_or(0) == 1;
    let value = integer(shot, &["shot_value"]).unwrap_or(0);
    let time_remaining = match (
        integer(shot, &["minutes_remaining"]),
        integer(shot, &["seconds_remaining"]),
    ) {
        (Some(minutes), Some(seconds)) => format!("{}:{:02}", minutes, seconds),
        _ => String::new(),
    };

    let row = json!({
        "player_id": player_id,
        "game_id": game_id,
        "team_id": team_id,
        "season": season,
        "season_type": text(shot, &["season_type"]).unwrap_or_else(|| "Regular Season".to_string()),
        "shot_made": made,
        "shot_type": text(shot, &["action_type", "shot_type"]).unwrap_or_default(),
        "shot_zone": text(shot, &["shot_zone_basic", "shot_zone"]).unwrap_or_default(),
        "shot_distance": number(shot, &["shot_distance"]).unwrap_or(0.0),
        "loc_x": integer(shot, &["loc_x"]).unwrap_or(0),
        "loc_y": integer(shot, &["loc_y"]).unwrap_or(0),
        "quarter": integer(shot, &["period", "quarter"]).unwrap_or(1),
        "time_remaining": time_remaining,
        "points": if made { value } else { 0 },
    });

    match row {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::Transform(format!("shot row for player {} is not an object", player_id))),
    }
}
