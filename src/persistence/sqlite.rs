//! SQLite implementation of the PersistenceGateway trait
//!
//! Rows are stored as JSON payloads keyed by `(collection, natural_key)`,
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::{natural_key, PersistenceGateway, Row, UpsertReport};
use crate::error::PersistenceError;
use crate::jobs::model::SyncJob;

const UPSERT_RECORD: &str = r#"
    INSERT INTO records (collection, natural_key, payload)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(collection, natural_key) DO UPDATE SET
        payload = excluded.payload,
        updated_at = CURRENT_TIMESTAMP
    RETURNING id
"#;

/// SQLite gateway
pub struct SqliteGateway {
    conn: Connection,
}

impl SqliteGateway {
    /// Open (or create) a database and apply the schema
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        Self::new(":memory:").await
    }

    /// Number of records in a collection
    pub async fn count(&self, collection: &str) -> Result<u64, PersistenceError> {
        let collection = collection.to_string();

        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM records WHERE collection = ?1",
                    [&collection],
                    |row| row.get::<_, i64>(0),
                )
                .map(|count| count as u64)
            })
            .await
            .map_err(Into::into)
    }

    /// Stored row for a natural key
    pub async fn get(&self, collection: &str, natural_key: &str) -> Result<Option<Row>, PersistenceError> {
        let collection = collection.to_string();
        let natural_key = natural_key.to_string();

        let payload: Option<String> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT payload FROM records WHERE collection = ?1 AND natural_key = ?2",
                    rusqlite::params![collection, natural_key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        payload
            .map(|payload| serde_json::from_str(&payload).map_err(PersistenceError::from))
            .transpose()
    }

    /// Status recorded in the sync log for a job
    pub async fn logged_status(&self, job_id: &str) -> Result<Option<String>, PersistenceError> {
        let job_id = job_id.to_string();

        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT status FROM sync_log WHERE job_id = ?1",
                    [&job_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn batch_upsert(
        &self,
        collection: &str,
        rows: Vec<Row>,
        conflict_keys: &[String],
    ) -> Result<UpsertReport, PersistenceError> {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in &rows {
            keyed.push((natural_key(row, conflict_keys)?, serde_json::to_string(row)?));
        }
        let collection = collection.to_string();

        let ids = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut ids = Vec::with_capacity(keyed.len());
                {
                    let mut stmt = tx.prepare_cached(UPSERT_RECORD)?;
                    for (key, payload) in &keyed {
                        let id: i64 = stmt.query_row(
                            rusqlite::params![collection, key, payload],
                            |row| row.get(0),
                        )?;
                        ids.push(id);
                    }
                }
                tx.commit()?;
                Ok(ids)
            })
            .await?;

        Ok(UpsertReport {
            affected: ids.len(),
            ids,
        })
    }

    async fn find_id(&self, collection: &str, natural_key: &str) -> Result<Option<i64>, PersistenceError> {
        let collection = collection.to_string();
        let natural_key = natural_key.to_string();

        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id FROM records WHERE collection = ?1 AND natural_key = ?2",
                    rusqlite::params![collection, natural_key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
            .map_err(Into::into)
    }

    async fn log_job(&self, job: &SyncJob) -> Result<(), PersistenceError> {
        let job_id = job.id.clone();
        let job_type = job.job_type.clone();
        let status = job.status.to_string();
        let started_at = job.started_at.map(|t| t.to_rfc3339());
        let completed_at = job.completed_at.map(|t| t.to_rfc3339());
        let processed = job.result.success_count as i64;
        let failed = job.result.failure_count as i64;
        let error = job.error.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_log
                    (job_id, job_type, status, started_at, completed_at,
                     records_processed, records_failed, error_message)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(job_id) DO UPDATE SET
                        status = excluded.status,
                        started_at = COALESCE(excluded.started_at, sync_log.started_at),
                        completed_at = excluded.completed_at,
                        records_processed = excluded.records_processed,
                        records_failed = excluded.records_failed,
                        error_message = excluded.error_message
                    "#,
                    rusqlite::params![
                        job_id,
                        job_type,
                        status,
                        started_at,
                        completed_at,
                        processed,
                        failed,
                        error
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}
