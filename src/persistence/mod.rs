//! Persistence layer for synced entities
//!
//! This module defines the gateway trait the engine writes through, plus an
//! in-memory and a SQLite implementation.

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::PersistenceError;
use crate::jobs::model::SyncJob;

/// One record destined for a collection
pub type Row = Map<String, Value>;

/// Outcome of a batch upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    /// Rows inserted or updated
    pub affected: usize,
    /// Internal id of each input row, in input order
    pub ids: Vec<i64>,
}

/// Idempotent store for synced entities
///
/// Rows are identified by the values of their conflict keys; writing the same
/// natural key twice updates the existing record and keeps its internal id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert or update `rows` in `collection`, matching on `conflict_keys`
    async fn batch_upsert(
        &self,
        collection: &str,
        rows: Vec<Row>,
        conflict_keys: &[String],
    ) -> Result<UpsertReport, PersistenceError>;

    /// Internal id of the record with the given natural key
    async fn find_id(&self, collection: &str, natural_key: &str) -> Result<Option<i64>, PersistenceError>;

    /// Record a job's state in the sync log
    async fn log_job(&self, job: &SyncJob) -> Result<(), PersistenceError>;
}

/// Natural key of a row: its conflict key values joined with `|`
pub fn natural_key(row: &Row, conflict_keys: &[String]) -> Result<String, PersistenceError> {
    let mut parts = Vec::with_capacity(conflict_keys.len());
    for key in conflict_keys {
        let part = match row.get(key) {
            None | Some(Value::Null) => return Err(PersistenceError::MissingKey(key.clone())),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        parts.push(part);
    }
    Ok(parts.join("|"))
}
