//! `sync_player_stats`: per-season averages for each player
//!
//! Params:
//! - `season`: e.g. `2024-25`; defaults to the season in progress
//! - `player_ids`: restrict the run to these external ids instead of listing
//!   every player

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{json, Value};

use super::transform::{integer, number, per_game, percentage, text};
use super::{items_from_list, SyncPipeline, WorkItem};
use crate::error::SyncError;
use crate::jobs::model::JobParams;
use crate::persistence::Row;
use crate::sync::provider::{Entity, EntityKind, Query};
use crate::sync::SyncContext;

pub struct PlayerStatsPipeline;

#[async_trait]
impl SyncPipeline for PlayerStatsPipeline {
    fn job_type(&self) -> &'static str {
        "sync_player_stats"
    }

    fn collection(&self) -> &'static str {
        EntityKind::PlayerStats.collection()
    }

    fn conflict_keys(&self) -> Vec<String> {
        vec!["player_id".to_string(), "season".to_string()]
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

        let stats = ctx
            .fetch_detail(EntityKind::PlayerStats, &item.key, &query)
            .await?;

        let games = integer(&stats, &["games_played", "gp"]).unwrap_or(0);
        if games <= 0 {
            return Ok(Vec::new());
        }

        let player_id = ctx
            .resolve_id(EntityKind::Player, &item.key)
            .await?
            .ok_or_else(|| SyncError::Transform(format!("unknown player {}", item.key)))?;

        Ok(vec![stats_row(player_id, &season, games, &stats)?])
    }
}

/// One item per requested player, or per listed player when `player_ids` is absent
pub(crate) async fn plan_players(ctx: &SyncContext, params: &JobParams) -> Result<Vec<WorkItem>, SyncError> {
    let requested = params.get_list("player_ids");
    if !requested.is_empty() {
        return Ok(requested
            .into_iter()
            .map(|id| WorkItem::new(id.clone(), id.clone(), json!({ "id": id })))
            .collect());
    }

    let mut query = params.query();
    for key in SEASON_SCOPED_PARAMS {
        query.remove(key);
    }
    let players = ctx.fetch_list(EntityKind::Player, &query).await?;
    Ok(items_from_list(
        players,
        &["id", "player_id", "person_id"],
        &["full_name", "display_name", "name"],
    ))
}

/// Params that select stats, not players
const SEASON_SCOPED_PARAMS: [&str; 3] = ["season", "player_ids", "max_shots"];

pub(crate) fn season_param(params: &JobParams) -> String {
    params
        .get_str("season")
        .map(str::to_string)
        .unwrap_or_else(|| current_season(Utc::now().date_naive()))
}

/// Season label for a date; a season starts in October
pub fn current_season(today: NaiveDate) -> String {
    let start = if today.month() >= 10 {
        today.year()
    } else {
        today.year() - 1
    };
    format!("{}-{:02}", start, (start + 1) % 100)
}

fn stats_row(player_id: i64, season: &str, games: i64, stats: &Entity) -> Result<Row, SyncError> {
    let total = |names: &[&str]| number(stats, names).unwrap_or(0.0);

    let row = json!({
        "player_id": player_id,
        "season": season,
        "team": text(stats, &["team_abbreviation", "team"]),
        "games_played": games,
        "minutes_per_game": per_game(total(&["min", "minutes"]), games),
        "points_per_game": per_game(total(&["pts", "points"]), games),
        "rebounds_per_game": per_game(total(&["reb", "rebounds"]), games),
        "assists_per_game": per_game(total(&["ast", "assists"]), games),
        "steals_per_game": per_game(total(&["stl", "steals"]), games),
        "blocks_per_game": per_game(total(&["blk", "blocks"]), games),
        "turnovers_per_game": per_game(total(&["tov", "turnovers"]), games),
        "fg_pct": percentage(total(&["fgm"]), total(&["fga"])),
        "three_pct": percentage(total(&["fg3m"]), total(&["fg3a"])),
        "ft_pct": percentage(total(&["ftm"]), total(&["fta"])),
    });

    match row {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::Transform(format!("stats row for player {} is not an object", player_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Season rolls over in October
    #[test]
    fn test_current_season() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        assert_eq!(current_season(date(2024, 10, 1)), "2024-25");
        assert_eq!(current_season(date(2025, 3, 15)), "2024-25");
        assert_eq!(current_season(date(2025, 9, 30)), "2024-25");
        assert_eq!(current_season(date(2099, 12, 1)), "2099-00");
    }

    // Test 2: Explicit season param wins
    #[test]
    fn test_season_param() {
        let params = JobParams::new().with("season", "2022-23");
        assert_eq!(season_param(&params), "2022-23");
    }

    // Test 3: Totals become per-game averages and percentages
    #[test]
    fn test_stats_row() {
        let stats = json!({
            "gp": 71,
            "team_abbreviation": "LAL",
            "pts": 1822,
            "reb": 518,
            "ast": 589,
            "fgm": 685,
            "fga": 1269,
            "fg3m": 149,
            "fg3a": 362,
            "ftm": 303,
            "fta": 404
        });

        let row = stats_row(7, "2023-24", 71, &stats).unwrap();

        assert_eq!(row["player_id"], 7);
        assert_eq!(row["season"], "2023-24");
        assert_eq!(row["team"], "LAL");
        assert_eq!(row["points_per_game"], 25.66);
        assert_eq!(row["rebounds_per_game"], 7.3);
        assert_eq!(row["fg_pct"], 0.54);
        assert_eq!(row["three_pct"], 0.412);
        assert_eq!(row["ft_pct"], 0.75);
        assert_eq!(row["steals_per_game"], 0.0);
    }
}
