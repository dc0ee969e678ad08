//! HTTP-backed statistics provider
//!
//! Speaks a plain JSON REST API: `GET {base}/{resource}` for lists and
//! `GET {base}/{resource}/{id}` for detail records. Responses may be a bare
//! JSON value or wrapped in a `{"data": ...}` envelope.
//!
//! Spacing and retries are not handled here; callers go through
//! [`RetryingFetcher`](crate::sync::RetryingFetcher).

use crate::config::ProviderConfig;
use crate::error::FetchError;
use crate::sync::provider::{Entity, EntityKind, Query, StatsProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// [`StatsProvider`] talking to a REST endpoint through reqwest
#[derive(Debug, Clone)]
pub struct HttpStatsProvider {
    client: Client,
    base_url: String,
    rate_limit_wait_secs: u64,
}

impl HttpStatsProvider {
    /// Build a provider with its own reqwest client
    pub fn new(config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Build a provider around an existing reqwest client
    pub fn with_client(client: Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limit_wait_secs: config.rate_limit_wait_secs,
        }
    }

    async fn get_json(&self, url: &str, query: &Query) -> Result<Entity, FetchError> {
        debug!(url = url, "Sending HTTP GET request");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await.map_err(map_transport_error)?;
                debug!(url = url, body_size = body.len(), "Received response");
                serde_json::from_slice(&body)
                    .map_err(|e| FetchError::InvalidData(format!("{}: {}", url, e)))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.rate_limit_wait_secs);

                warn!(url = url, retry_after = wait, "Rate limited by provider");
                Err(FetchError::RateLimited(wait))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                warn!(url = url, status = response.status().as_u16(), "Provider timed out");
                Err(FetchError::Timeout)
            }
            StatusCode::NOT_FOUND => {
                debug!(url = url, "Resource not found (404)");
                Err(FetchError::NotFound)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = url, status = ?response.status(), "Unauthorized");
                Err(FetchError::Unauthorized)
            }
            status => {
                warn!(url = url, status = status.as_u16(), "Unexpected status");
                Err(FetchError::Server(status.as_u16()))
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connection(e.to_string())
    } else if e.is_decode() {
        FetchError::InvalidData(e.to_string())
    } else {
        FetchError::Connection(e.to_string())
    }
}

/// Strip an optional `{"data": ...}` envelope
fn unwrap_envelope(value: Entity) -> Entity {
    match value {
        Entity::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Entity::Null)
        }
        other => other,
    }
}

#[async_trait]
impl StatsProvider for HttpStatsProvider {
    async fn fetch_list(&self, kind: EntityKind, query: &Query) -> Result<Vec<Entity>, FetchError> {
        let url = format!("{}/{}", self.base_url, kind.path());
        match unwrap_envelope(self.get_json(&url, query).await?) {
            Entity::Array(items) => Ok(items),
            other => Err(FetchError::InvalidData(format!(
                "expected a list of {} entities, got {}",
                kind,
                json_type(&other)
            ))),
        }
    }

    async fn fetch_detail(
        &self,
        kind: EntityKind,
        id: &str,
        query: &Query,
    ) -> Result<Entity, FetchError> {
        let url = format!("{}/{}/{}", self.base_url, kind.path(), id);
        match unwrap_envelope(self.get_json(&url, query).await?) {
            entity @ Entity::Object(_) => Ok(entity),
            other => Err(FetchError::InvalidData(format!(
                "expected a {} object, got {}",
                kind,
                json_type(&other)
            ))),
        }
    }
}

fn json_type(value: &Entity) -> &'static str {
    match value {
        Entity::Null => "null",
        Entity::Bool(_) => "boolean",
        Entity::Number(_) => "number",
        Entity::String(_) => "string",
        Entity::Array(_) => "array",
        Entity::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpStatsProvider {
        HttpStatsProvider::new(&ProviderConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            user_agent: "hoops-test".to_string(),
            rate_limit_wait_secs: 60,
        })
        .unwrap()
    }

    // Test 1: List request returns entities and forwards query parameters
    #[tokio::test]
    async fn test_fetch_list_with_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .and(query_param("season", "2024-25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "g1"},
                {"id": "g2"}
            ])))
            .mount(&mock_server)
            .await;

        let mut query = Query::new();
        query.insert("season".to_string(), "2024-25".to_string());

        let games = provider(&mock_server)
            .fetch_list(EntityKind::Game, &query)
            .await
            .unwrap();

        assert_eq!(games.len(), 2);
        assert_eq!(games[1]["id"], "g2");
    }

    // Test 2: Data envelope is unwrapped
    #[tokio::test]
    async fn test_fetch_detail_unwraps_envelope() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams/1610612747"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": 1610612747, "full_name": "Los Angeles Lakers"}
            })))
            .mount(&mock_server)
            .await;

        let team = provider(&mock_server)
            .fetch_detail(EntityKind::Team, "1610612747", &Query::new())
            .await
            .unwrap();

        assert_eq!(team["full_name"], "Los Angeles Lakers");
    }

    // Test 3: HTTP 429 returns RateLimited with Retry-After
    #[tokio::test]
    async fn test_429_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_list(EntityKind::Player, &Query::new())
            .await;

        match result.unwrap_err() {
            FetchError::RateLimited(secs) => assert_eq!(secs, 120),
            err => panic!("Expected RateLimited error, got {:?}", err),
        }
    }

    // Test 4: HTTP 429 without Retry-After uses configured wait
    #[tokio::test]
    async fn test_429_uses_default_wait() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_list(EntityKind::Player, &Query::new())
            .await;

        assert_eq!(result.unwrap_err(), FetchError::RateLimited(60));
    }

    // Test 5: HTTP 404 returns NotFound
    #[tokio::test]
    async fn test_404_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/players/99"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_detail(EntityKind::Player, "99", &Query::new())
            .await;

        assert_eq!(result.unwrap_err(), FetchError::NotFound);
    }

    // Test 6: HTTP 5xx returns a permanent Server error
    #[tokio::test]
    async fn test_5xx_server_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_list(EntityKind::Team, &Query::new())
            .await;

        assert_eq!(result.unwrap_err(), FetchError::Server(500));
    }

    // Test 7: Gateway timeout is reported as a timeout
    #[tokio::test]
    async fn test_504_is_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(504))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_list(EntityKind::Team, &Query::new())
            .await;

        assert_eq!(result.unwrap_err(), FetchError::Timeout);
    }

    // Test 8: Malformed bodies are invalid data
    #[tokio::test]
    async fn test_malformed_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_list(EntityKind::Team, &Query::new())
            .await;

        assert!(matches!(result, Err(FetchError::InvalidData(_))));
    }

    // Test 9: A list endpoint answering with an object is rejected
    #[tokio::test]
    async fn test_list_shape_mismatch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server)
            .fetch_list(EntityKind::Team, &Query::new())
            .await;

        match result.unwrap_err() {
            FetchError::InvalidData(msg) => assert!(msg.contains("got object")),
            err => panic!("Expected InvalidData, got {:?}", err),
        }
    }

    // Test 10: Unreachable host is a transient connection failure
    #[tokio::test]
    async fn test_connection_refused() {
        let provider = HttpStatsProvider::new(&ProviderConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..ProviderConfig::default()
        })
        .unwrap();

        let result = provider.fetch_list(EntityKind::Team, &Query::new()).await;

        assert!(matches!(result, Err(FetchError::Connection(_))));
    }
}
