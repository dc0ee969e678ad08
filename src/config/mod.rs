//! Configuration management for hoops-sync
//!
//! This module handles loading, parsing, and validating engine configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// External statistics provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Global outbound call spacing
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Job orchestration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix HOOPS_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("HOOPS_SYNC_PROVIDER_BASE_URL") {
            config.provider.base_url = url;
        }
        if let Ok(ms) = std::env::var("HOOPS_SYNC_RATE_LIMIT_MIN_INTERVAL_MS") {
            config.rate_limit.min_interval_ms = parse_env("HOOPS_SYNC_RATE_LIMIT_MIN_INTERVAL_MS", &ms)?;
        }
        if let Ok(attempts) = std::env::var("HOOPS_SYNC_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_env("HOOPS_SYNC_RETRY_MAX_ATTEMPTS", &attempts)?;
        }
        if let Ok(size) = std::env::var("HOOPS_SYNC_JOBS_BATCH_SIZE") {
            config.jobs.batch_size = parse_env("HOOPS_SYNC_JOBS_BATCH_SIZE", &size)?;
        }
        if let Ok(workers) = std::env::var("HOOPS_SYNC_JOBS_MAX_WORKERS") {
            config.jobs.max_workers = parse_env("HOOPS_SYNC_JOBS_MAX_WORKERS", &workers)?;
        }
        if let Ok(path) = std::env::var("HOOPS_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(level) = std::env::var("HOOPS_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "jobs.batch_size must be at least 1".to_string(),
            ));
        }
        if self.jobs.max_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "jobs.max_workers must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jobs.max_failure_ratio) {
            return Err(ConfigError::InvalidValue(format!(
                "jobs.max_failure_ratio must be within 0.0..=1.0, got {}",
                self.jobs.max_failure_ratio
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value)))
}

/// External provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the statistics API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Wait reported for a 429 response that carries no Retry-After header
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_provider_timeout(),
            user_agent: default_user_agent(),
            rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("hoops-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_rate_limit_wait() -> u64 {
    60
}

/// Global rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum spacing between two outbound calls in milliseconds
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval(),
        }
    }
}

fn default_min_interval() -> u64 {
    1000
}

/// Retry configuration with linear backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before retry N is `base_delay_ms * N`
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Scale each backoff to 50-100% of its value
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    5000
}

fn default_max_delay() -> u64 {
    60_000
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// TTL for list responses in seconds, 0 disables expiry
    #[serde(default = "default_list_ttl")]
    pub list_ttl_secs: u64,

    /// TTL for detail responses in seconds, 0 disables expiry
    #[serde(default = "default_detail_ttl")]
    pub detail_ttl_secs: u64,

    /// How often the janitor purges expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn list_ttl(&self) -> Option<Duration> {
        ttl_from_secs(self.list_ttl_secs)
    }

    pub fn detail_ttl(&self) -> Option<Duration> {
        ttl_from_secs(self.detail_ttl_secs)
    }
}

fn ttl_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            list_ttl_secs: default_list_ttl(),
            detail_ttl_secs: default_detail_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_list_ttl() -> u64 {
    1800
}

fn default_detail_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

/// Job orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Work items per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on concurrent units within a batch
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long the supervisor waits for one batch to settle
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,

    /// Pause between batches in milliseconds
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,

    /// Terminal jobs older than this are removed by the janitor
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// A job whose failed share of items reaches this ratio ends Failed
    #[serde(default = "default_max_failure_ratio")]
    pub max_failure_ratio: f64,
}

impl JobsConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            batch_timeout_secs: default_batch_timeout(),
            cooldown_ms: default_cooldown(),
            retention_hours: default_retention_hours(),
            max_failure_ratio: default_max_failure_ratio(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}

fn default_max_workers() -> usize {
    2
}

fn default_batch_timeout() -> u64 {
    180
}

fn default_cooldown() -> u64 {
    2000
}

fn default_retention_hours() -> u64 {
    24
}

fn default_max_failure_ratio() -> f64 {
    1.0
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/hoops-sync.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Parse complete configuration from YAML
    #[test]
    fn test_parse_complete_yaml_config() {
        let yaml = r#"
provider:
  base_url: "https://stats.example.com/v1"
  timeout_secs: 15
  user_agent: "hoops-test"

rate_limit:
  min_interval_ms: 800

retry:
  max_attempts: 4
  base_delay_ms: 3000
  max_delay_ms: 20000
  jitter: true

cache:
  list_ttl_secs: 600
  detail_ttl_secs: 0
  sweep_interval_secs: 60

jobs:
  batch_size: 10
  max_workers: 4
  batch_timeout_secs: 90
  cooldown_ms: 500
  retention_hours: 6
  max_failure_ratio: 0.5

database:
  path: "/var/lib/hoops/sync.db"

logging:
  level: "debug"
  format: "pretty"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.provider.base_url, "https://stats.example.com/v1");
        assert_eq!(config.provider.timeout_secs, 15);
        assert_eq!(config.provider.user_agent, "hoops-test");

        assert_eq!(config.rate_limit.min_interval(), Duration::from_millis(800));

        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 3000);
        assert_eq!(config.retry.max_delay_ms, 20000);
        assert!(config.retry.jitter);

        assert_eq!(config.cache.list_ttl(), Some(Duration::from_secs(600)));
        assert_eq!(config.cache.detail_ttl(), None);
        assert_eq!(config.cache.sweep_interval_secs, 60);

        assert_eq!(config.jobs.batch_size, 10);
        assert_eq!(config.jobs.max_workers, 4);
        assert_eq!(config.jobs.batch_timeout(), Duration::from_secs(90));
        assert_eq!(config.jobs.cooldown(), Duration::from_millis(500));
        assert_eq!(config.jobs.retention(), Duration::from_secs(6 * 3600));
        assert!((config.jobs.max_failure_ratio - 0.5).abs() < f64::EPSILON);

        assert_eq!(config.database.path, "/var/lib/hoops/sync.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
    }

    // Test 2: Default values are applied for missing fields
    #[test]
    fn test_default_values_applied() {
        let yaml = r#"
jobs:
  batch_size: 3
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.jobs.batch_size, 3);
        assert_eq!(config.jobs.max_workers, 2);
        assert_eq!(config.jobs.batch_timeout_secs, 180);
        assert_eq!(config.jobs.cooldown_ms, 2000);
        assert_eq!(config.jobs.retention_hours, 24);

        assert_eq!(config.rate_limit.min_interval_ms, 1000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 5000);
        assert!(!config.retry.jitter);

        assert_eq!(config.cache.list_ttl_secs, 1800);
        assert_eq!(config.cache.detail_ttl_secs, 3600);

        assert_eq!(config.database.path, "data/hoops-sync.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    // Test 3: Environment variable expansion
    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("HOOPS_TEST_PROVIDER_URL", "https://env.example.com");
        std::env::set_var("HOOPS_TEST_DB_PATH", "/env/data/test.db");

        let yaml = r#"
provider:
  base_url: "${HOOPS_TEST_PROVIDER_URL}"

database:
  path: "${HOOPS_TEST_DB_PATH}"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.provider.base_url, "https://env.example.com");
        assert_eq!(config.database.path, "/env/data/test.db");

        std::env::remove_var("HOOPS_TEST_PROVIDER_URL");
        std::env::remove_var("HOOPS_TEST_DB_PATH");
    }

    // Test 4: Unset variables are left as-is
    #[test]
    fn test_unset_env_var_kept_verbatim() {
        let expanded = expand_env_vars("path: ${HOOPS_TEST_DEFINITELY_UNSET}");
        assert_eq!(expanded, "path: ${HOOPS_TEST_DEFINITELY_UNSET}");
    }

    // Test 5: from_env loads config from environment variables
    #[test]
    fn test_from_env() {
        std::env::set_var("HOOPS_SYNC_PROVIDER_BASE_URL", "http://provider:9000");
        std::env::set_var("HOOPS_SYNC_JOBS_BATCH_SIZE", "7");
        std::env::set_var("HOOPS_SYNC_DATABASE_PATH", "/env/sync.db");

        let config = Config::from_env().unwrap();

        assert_eq!(config.provider.base_url, "http://provider:9000");
        assert_eq!(config.jobs.batch_size, 7);
        assert_eq!(config.database.path, "/env/sync.db");

        std::env::remove_var("HOOPS_SYNC_PROVIDER_BASE_URL");
        std::env::remove_var("HOOPS_SYNC_JOBS_BATCH_SIZE");
        std::env::remove_var("HOOPS_SYNC_DATABASE_PATH");
    }

    // Test 6: Parse error for invalid YAML
    #[test]
    fn test_parse_error_invalid_yaml() {
        let yaml = r#"
jobs:
  batch_size: "lots"
"#;

        let result = Config::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // Test 7: Validation rejects unusable values
    #[test]
    fn test_validation_rejects_zero_workers() {
        let yaml = r#"
jobs:
  max_workers: 0
"#;

        let result = Config::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.jobs.max_failure_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    // Test 8: File loading reports read errors
    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/hoops-sync.yaml");
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }
}
