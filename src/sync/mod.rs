//! Provider access for sync jobs
//!
//! Every outbound call goes cache -> retry -> rate limiter -> provider.
//!
//! # Components
//!
//! - [`rate_limiter`]: process-wide minimum spacing between provider calls
//! - [`retry`]: transient/permanent classification with linear backoff
//! - [`provider`]: the provider trait and entity kinds
//! - [`http_client`]: reqwest-backed provider
//! - [`identity`]: external to internal id map
//! - [`context`]: the bundle of the above shared by every job
//!
//! # Example
//!
//! ```ignore
//! use hoops_sync::sync::{RateLimiter, RetryingFetcher};
//! use hoops_sync::config::RetryConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
//! let fetcher = RetryingFetcher::new(RetryConfig::default(), limiter);
//!
//! let teams = fetcher.call(|| provider.fetch_list(EntityKind::Team, &query)).await?;
//! ```

pub mod context;
pub mod http_client;
pub mod identity;
pub mod provider;
pub mod rate_limiter;
pub mod retry;

pub use context::SyncContext;
pub use http_client::HttpStatsProvider;
pub use identity::IdentityMapper;
pub use provider::{Entity, EntityKind, Query, StatsProvider};
pub use rate_limiter::RateLimiter;
pub use retry::RetryingFetcher;
