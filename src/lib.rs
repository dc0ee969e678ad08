//! hoops-sync - Rate-limited synchronization of basketball statistics
//!
//! This crate pulls teams, players, games and per-season player stats from an
//! external statistics provider and writes them into a local store. Provider
//! calls go through a single global rate limiter, a retry policy and a TTL
//! response cache; work runs as jobs with progress reporting and cooperative
//! cancellation.

pub mod cache;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod persistence;
pub mod pipelines;
pub mod sync;
