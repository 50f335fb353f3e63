//! Queue database schema

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Create or upgrade the schema. Refuses databases written by a newer build.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating queue schema v{}", SCHEMA_VERSION);
        conn.execute_batch(QUEUE_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating queue schema from v{} to v{}", current_version, SCHEMA_VERSION);
        conn.execute_batch(QUEUE_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    } else {
        debug!("Queue schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Current schema version (0 if not initialized)
pub fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    Ok(version.unwrap_or(0))
}

pub(crate) fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Pending queue and rejection log
const QUEUE_SCHEMA: &str = r#"
-- Records not yet acknowledged by the ledger. The full record is kept as JSON
-- in `payload`; the other columns exist for counting and inspection.
CREATE TABLE IF NOT EXISTS pending_records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    client_id TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount > 0),
    record_version INTEGER NOT NULL,
    payload TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

-- Records the ledger definitively refused, kept for manual follow-up
CREATE TABLE IF NOT EXISTS rejected_records (
    id TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    reason TEXT NOT NULL,
    rejected_at TEXT NOT NULL
);
"#;
