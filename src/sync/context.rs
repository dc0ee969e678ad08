//! Shared collaborators for sync work
//!
//! A [`SyncContext`] bundles the provider, the retrying fetcher (and through
//! it the process-wide rate limiter), the response cache, the identity map
//! and the persistence gateway. Every job and every unit borrows the same one.

use crate::cache::TtlCache;
use crate::config::{CacheConfig, Config};
use crate::error::{FetchError, PersistenceError};
use crate::persistence::PersistenceGateway;
use crate::sync::identity::IdentityMapper;
use crate::sync::provider::{Entity, EntityKind, Query, StatsProvider};
use crate::sync::rate_limiter::RateLimiter;
use crate::sync::retry::RetryingFetcher;
use std::sync::Arc;
use tracing::debug;

pub struct SyncContext {
    provider: Arc<dyn StatsProvider>,
    fetcher: RetryingFetcher,
    cache: Arc<TtlCache<Entity>>,
    identity: Arc<IdentityMapper>,
    gateway: Arc<dyn PersistenceGateway>,
    cache_config: CacheConfig,
}

impl SyncContext {
    pub fn new(
        provider: Arc<dyn StatsProvider>,
        fetcher: RetryingFetcher,
        cache: Arc<TtlCache<Entity>>,
        identity: Arc<IdentityMapper>,
        gateway: Arc<dyn PersistenceGateway>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            provider,
            fetcher,
            cache,
            identity,
            gateway,
            cache_config,
        }
    }

    /// Wire a context from configuration with a fresh limiter, cache and identity map
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn StatsProvider>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        Self::new(
            provider,
            RetryingFetcher::new(config.retry.clone(), limiter),
            Arc::new(TtlCache::new()),
            Arc::new(IdentityMapper::new()),
            gateway,
            config.cache.clone(),
        )
    }

    /// All entities of a kind, cached under `{kind}:list:{query}`
    pub async fn fetch_list(&self, kind: EntityKind, query: &Query) -> Result<Vec<Entity>, FetchError> {
        let key = format!("{}:list:{}", kind, query_key(query));

        let value = self
            .cache
            .fetch(&key, self.cache_config.list_ttl(), || async move {
                self.fetcher
                    .call(|| self.provider.fetch_list(kind, query))
                    .await
                    .map(Entity::Array)
            })
            .await?;

        match value {
            Entity::Array(items) => Ok(items),
            _ => Err(FetchError::InvalidData(format!("cached {} list is not an array", kind))),
        }
    }

    /// One entity's detail record, cached under `{kind}:{id}`
    pub async fn fetch_detail(&self, kind: EntityKind, id: &str, query: &Query) -> Result<Entity, FetchError> {
        let key = if query.is_empty() {
            format!("{}:{}", kind, id)
        } else {
            format!("{}:{}?{}", kind, id, query_key(query))
        };

        self.cache
            .fetch(&key, self.cache_config.detail_ttl(), || {
                self.fetcher.call(|| self.provider.fetch_detail(kind, id, query))
            })
            .await
    }

    /// Internal id for an external id
    ///
    /// Served from the identity map; on a miss the store is asked once and
    /// a hit is remembered.
    pub async fn resolve_id(&self, kind: EntityKind, external_id: &str) -> Result<Option<i64>, PersistenceError> {
        if let Some(id) = self.identity.get(kind, external_id) {
            return Ok(Some(id));
        }

        let found = self.gateway.find_id(kind.collection(), external_id).await?;
        if let Some(id) = found {
            debug!(kind = %kind, external_id, id, "Resolved id from store");
            self.identity.set(kind, external_id, id);
        }
        Ok(found)
    }

    pub fn cache(&self) -> &Arc<TtlCache<Entity>> {
        &self.cache
    }

    pub fn identity(&self) -> &Arc<IdentityMapper> {
        &self.identity
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    pub fn fetcher(&self) -> &RetryingFetcher {
        &self.fetcher
    }
}

fn query_key(query: &Query) -> String {
    if query.is_empty() {
        return "all".to_string();
    }
    query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::persistence::{MemoryGateway, MockPersistenceGateway};
    use crate::sync::provider::MockStatsProvider;
    use serde_json::json;
    use std::time::Duration;

    fn context(provider: MockStatsProvider, gateway: Arc<dyn PersistenceGateway>) -> SyncContext {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        SyncContext::new(
            Arc::new(provider),
            RetryingFetcher::new(
                RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 0,
                    max_delay_ms: 0,
                    jitter: false,
                },
                limiter,
            ),
            Arc::new(TtlCache::new()),
            Arc::new(IdentityMapper::new()),
            gateway,
            CacheConfig::default(),
        )
    }

    // Test 1: Detail fetch is cached under kind:id
    #[tokio::test]
    async fn test_fetch_detail_is_cached() {
        let mut provider = MockStatsProvider::new();
        provider
            .expect_fetch_detail()
            .times(1)
            .returning(|_, id, _| Ok(json!({"id": id})));

        let ctx = context(provider, Arc::new(MemoryGateway::new()));

        let first = ctx.fetch_detail(EntityKind::Team, "1", &Query::new()).await.unwrap();
        let second = ctx.fetch_detail(EntityKind::Team, "1", &Query::new()).await.unwrap();

        assert_eq!(first, second);
        assert!(ctx.cache().get("team:1").is_some());
    }

    // Test 2: Transient list failures are retried, then cached
    #[tokio::test]
    async fn test_fetch_list_retries_then_caches() {
        let mut provider = MockStatsProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_fetch_list()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(FetchError::Timeout));
        provider
            .expect_fetch_list()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![json!({"id": 1}), json!({"id": 2})]));

        let ctx = context(provider, Arc::new(MemoryGateway::new()));

        let teams = ctx.fetch_list(EntityKind::Team, &Query::new()).await.unwrap();
        assert_eq!(teams.len(), 2);

        let again = ctx.fetch_list(EntityKind::Team, &Query::new()).await.unwrap();
        assert_eq!(again.len(), 2);
        assert!(ctx.cache().get("team:list:all").is_some());
    }

    // Test 3: Failed fetches are not cached
    #[tokio::test]
    async fn test_permanent_failure_not_cached() {
        let mut provider = MockStatsProvider::new();
        provider
            .expect_fetch_detail()
            .times(2)
            .returning(|_, _, _| Err(FetchError::NotFound));

        let ctx = context(provider, Arc::new(MemoryGateway::new()));

        for _ in 0..2 {
            let result = ctx.fetch_detail(EntityKind::Player, "9", &Query::new()).await;
            assert_eq!(result.unwrap_err(), FetchError::NotFound);
        }
        assert!(ctx.cache().is_empty());
    }

    // Test 4: Identity misses fall back to the store once
    #[tokio::test]
    async fn test_resolve_id_falls_back_to_store() {
        let mut gateway = MockPersistenceGateway::new();
        gateway
            .expect_find_id()
            .withf(|collection, key| collection == "teams" && key == "1610612747")
            .times(1)
            .returning(|_, _| Ok(Some(14)));
        gateway
            .expect_find_id()
            .withf(|_, key| key == "0")
            .returning(|_, _| Ok(None));

        let ctx = context(MockStatsProvider::new(), Arc::new(gateway));

        assert_eq!(ctx.resolve_id(EntityKind::Team, "1610612747").await.unwrap(), Some(14));
        // Second lookup is served by the identity map
        assert_eq!(ctx.resolve_id(EntityKind::Team, "1610612747").await.unwrap(), Some(14));
        assert_eq!(ctx.resolve_id(EntityKind::Team, "0").await.unwrap(), None);
    }

    // Test 5: Query parameters are part of the cache key
    #[test]
    fn test_query_key() {
        let mut query = Query::new();
        assert_eq!(query_key(&query), "all");

        query.insert("season".to_string(), "2024-25".to_string());
        query.insert("league".to_string(), "00".to_string());
        assert_eq!(query_key(&query), "league=00&season=2024-25");
    }
}
