//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hoops_sync::config::{Config, JobsConfig};
use hoops_sync::error::FetchError;
use hoops_sync::jobs::JobOrchestrator;
use hoops_sync::persistence::PersistenceGateway;
use hoops_sync::sync::{Entity, EntityKind, Query, StatsProvider, SyncContext};
use serde_json::json;
use tokio::time::Instant;

/// In-process statistics provider with call counters and failure injection
#[derive(Default)]
pub struct FakeProvider {
    lists: HashMap<EntityKind, Vec<Entity>>,
    details: HashMap<(EntityKind, String), Entity>,
    delay: Duration,
    /// Upcoming calls that fail with a transient timeout
    transient_failures: AtomicU32,
    /// Detail ids that always fail with NotFound
    missing: Mutex<HashSet<String>>,
    list_calls: AtomicU32,
    detail_calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` teams with ids 1..=count, listed and with detail records
    pub fn with_teams(mut self, count: usize) -> Self {
        let teams: Vec<Entity> = (1..=count).map(team).collect();
        for t in &teams {
            self.details
                .insert((EntityKind::Team, t["id"].to_string()), t.clone());
        }
        self.lists.insert(EntityKind::Team, teams);
        self
    }

    /// Players with ids 100.., each on team `1 + i % teams`
    pub fn with_players(mut self, count: usize, teams: usize) -> Self {
        let players: Vec<Entity> = (0..count)
            .map(|i| player(100 + i, 1 + i % teams.max(1)))
            .collect();
        for p in &players {
            self.details
                .insert((EntityKind::Player, p["id"].to_string()), p.clone());
        }
        self.lists.insert(EntityKind::Player, players);
        self
    }

    pub fn with_games(mut self, games: Vec<Entity>) -> Self {
        self.lists.insert(EntityKind::Game, games);
        self
    }

    pub fn with_stats(mut self, player_id: &str, stats: Entity) -> Self {
        self.details
            .insert((EntityKind::PlayerStats, player_id.to_string()), stats);
        self
    }

    pub fn with_shot_chart(mut self, player_id: &str, chart: Entity) -> Self {
        self.details
            .insert((EntityKind::ShotChart, player_id.to_string()), chart);
        self
    }

    /// Every call takes `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The next `count` calls fail with a transient timeout
    pub fn fail_next(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Detail calls for `id` fail permanently
    pub fn mark_missing(&self, id: &str) {
        self.missing.lock().unwrap().insert(id.to_string());
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> u32 {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.list_calls() + self.detail_calls()
    }

    /// When each call started, in order
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<(), FetchError> {
        self.call_times.lock().unwrap().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(FetchError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl StatsProvider for FakeProvider {
    async fn fetch_list(&self, kind: EntityKind, _query: &Query) -> Result<Vec<Entity>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.lists.get(&kind).cloned().unwrap_or_default())
    }

    async fn fetch_detail(&self, kind: EntityKind, id: &str, _query: &Query) -> Result<Entity, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if self.missing.lock().unwrap().contains(id) {
            return Err(FetchError::NotFound);
        }
        self.details
            .get(&(kind, id.to_string()))
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

pub fn team(id: usize) -> Entity {
    json!({
        "id": id,
        "full_name": format!("Team {}", id),
        "abbreviation": "BOS",
        "city": format!("City {}", id),
        "year_founded": 1946
    })
}

pub fn player(id: usize, team_id: usize) -> Entity {
    json!({
        "id": id,
        "full_name": format!("Player {}", id),
        "team_id": team_id,
        "position": "G",
        "height": "6-3",
        "experience": "R"
    })
}

pub fn game(id: usize, home: usize, away: usize) -> Entity {
    json!({
        "id": id,
        "date": "2024-01-15T00:00:00",
        "season": 2023,
        "home_team_id": home,
        "visitor_team_id": away,
        "home_team_score": 110,
        "visitor_team_score": 104,
        "status": "Final"
    })
}

/// Configuration with no spacing, no cooldown and fast retries
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.rate_limit.min_interval_ms = 0;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.jobs = JobsConfig {
        batch_size: 2,
        max_workers: 2,
        batch_timeout_secs: 30,
        cooldown_ms: 0,
        ..JobsConfig::default()
    };
    config
}

/// Orchestrator over a fake provider and the given store
pub fn create_orchestrator(
    config: &Config,
    provider: Arc<FakeProvider>,
    gateway: Arc<dyn PersistenceGateway>,
) -> JobOrchestrator {
    let ctx = SyncContext::from_config(config, provider, gateway);
    JobOrchestrator::new(Arc::new(ctx), config.jobs.clone())
}
