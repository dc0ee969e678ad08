//! SQLite schema for hoops-sync

/// SQL statement to create the database schema
pub const CREATE_SCHEMA: &str = r#"
-- Synced entities, one JSON payload per natural key
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(collection, natural_key)
);

CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);

-- One row per job run
CREATE TABLE IF NOT EXISTS sync_log (
    job_id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at DATETIME,
    completed_at DATETIME,
    records_processed INTEGER DEFAULT 0,
    records_failed INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_log_type ON sync_log(job_type, started_at DESC);
"#;
