//! External statistics provider interface

use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw entity as returned by the provider
pub type Entity = serde_json::Value;

/// Query parameters forwarded to the provider, ordered for stable cache keys
pub type Query = BTreeMap<String, String>;

/// Kinds of entities the provider serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Team,
    Player,
    Game,
    PlayerStats,
    ShotChart,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Team,
        EntityKind::Player,
        EntityKind::Game,
        EntityKind::PlayerStats,
        EntityKind::ShotChart,
    ];

    /// Stable name used in cache keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Team => "team",
            EntityKind::Player => "player",
            EntityKind::Game => "game",
            EntityKind::PlayerStats => "player_stats",
            EntityKind::ShotChart => "shot_chart",
        }
    }

    /// Resource path on the provider
    pub fn path(&self) -> &'static str {
        match self {
            EntityKind::Team => "teams",
            EntityKind::Player => "players",
            EntityKind::Game => "games",
            EntityKind::PlayerStats => "player-stats",
            EntityKind::ShotChart => "shot-charts",
        }
    }

    /// Collection the entity is stored in
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Team => "teams",
            EntityKind::Player => "players",
            EntityKind::Game => "games",
            EntityKind::PlayerStats => "player_season_stats",
            EntityKind::ShotChart => "shot_charts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of entities; slow, rate limited and sometimes failing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Fetch all entities of a kind matching `query`
    async fn fetch_list(&self, kind: EntityKind, query: &Query) -> Result<Vec<Entity>, FetchError>;

    /// Fetch one entity's detail record
    async fn fetch_detail(
        &self,
        kind: EntityKind,
        id: &str,
        query: &Query,
    ) -> Result<Entity, FetchError>;
}
