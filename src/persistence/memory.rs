//! In-memory implementation of the PersistenceGateway trait
//!
//! Used for dry runs and tests; honors the same natural-key contract as the
//! SQLite gateway.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{natural_key, PersistenceGateway, Row, UpsertReport};
use crate::error::PersistenceError;
use crate::jobs::model::SyncJob;

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    row: Row,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    collections: HashMap<String, HashMap<String, StoredRow>>,
    sync_log: HashMap<String, SyncJob>,
}

/// Gateway keeping every collection in process memory
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: RwLock<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Stored row for a natural key
    pub async fn get(&self, collection: &str, natural_key: &str) -> Option<Row> {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|rows| rows.get(natural_key))
            .map(|stored| stored.row.clone())
    }

    /// Last logged state of a job
    pub async fn logged_job(&self, job_id: &str) -> Option<SyncJob> {
        self.state.read().await.sync_log.get(job_id).cloned()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn batch_upsert(
        &self,
        collection: &str,
        rows: Vec<Row>,
        conflict_keys: &[String],
    ) -> Result<UpsertReport, PersistenceError> {
        // Validate the whole batch before touching state so a bad row
        // leaves nothing half-written
        let keyed = rows
            .into_iter()
            .map(|row| natural_key(&row, conflict_keys).map(|key| (key, row)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.write().await;
        let MemoryState {
            next_id,
            collections,
            ..
        } = &mut *state;
        let records = collections.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(keyed.len());
        for (key, row) in keyed {
            let id = match records.get_mut(&key) {
                Some(stored) => {
                    stored.row = row;
                    stored.id
                }
                None => {
                    *next_id += 1;
                    records.insert(key, StoredRow { id: *next_id, row });
                    *next_id
                }
            };
            ids.push(id);
        }

        Ok(UpsertReport {
            affected: ids.len(),
            ids,
        })
    }

    async fn find_id(&self, collection: &str, natural_key: &str) -> Result<Option<i64>, PersistenceError> {
        Ok(self
            .state
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|rows| rows.get(natural_key))
            .map(|stored| stored.id))
    }

    async fn log_job(&self, job: &SyncJob) -> Result<(), PersistenceError> {
        self.state
            .write()
            .await
            .sync_log
            .insert(job.id.clone(), job.clone());
        Ok(())
    }
}
