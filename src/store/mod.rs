//! Pending record store - durable local queue
//!
//! SQLite-backed queue of collection records the ledger has not acknowledged
//! yet. Handles:
//! - Idempotent enqueue keyed by record id
//! - Crash-safe persistence (WAL, `synchronous=FULL`)
//! - A rejection log for records the ledger refused
//!
//! The store is an explicit instance. `open()` is idempotent and every
//! operation goes through it, so the handle can be shared by `Arc` between the
//! sync engine and the capture controller.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::record::{PendingCollectionRecord, RecordId};

/// File name of the queue database inside the data directory
pub const QUEUE_DB_FILE: &str = "queue.db";

#[derive(Debug, Clone)]
enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// A record the ledger refused, with its reason
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub record: PendingCollectionRecord,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Durable queue of not-yet-acknowledged collection records
pub struct PendingRecordStore {
    location: StoreLocation,
    conn: OnceCell<Arc<Mutex<Connection>>>,
}

impl PendingRecordStore {
    /// Store backed by the database file at `path`. Nothing is opened until `open()`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::File(path.as_ref().to_path_buf()),
            conn: OnceCell::new(),
        }
    }

    /// Store inside `data_dir` under the standard file name
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(QUEUE_DB_FILE))
    }

    /// In-memory store (for tests)
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            conn: OnceCell::new(),
        }
    }

    /// Open an on-disk store, creating it if needed
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.open().await?;
        Ok(store)
    }

    /// Open an in-memory store (for tests)
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self::in_memory();
        store.open().await?;
        Ok(store)
    }

    /// Open the database and apply the schema.
    ///
    /// Safe to call repeatedly and concurrently; only the first call does any work.
    pub async fn open(&self) -> Result<(), StoreError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<Arc<Mutex<Connection>>, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let location = self.location.clone();
                let conn = tokio::task::spawn_blocking(move || open_connection(&location)).await??;
                Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
            })
            .await?;
        Ok(conn.clone())
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("Lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await?
    }

    /// Durably insert a record. Returns `false` if the id was already queued,
    /// in which case the stored record is left untouched.
    pub async fn enqueue(&self, record: &PendingCollectionRecord) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(record)?;
        let id = record.id.clone();
        let client_id = record.client_id.clone();
        let amount = record.amount;
        let version = record.schema_version;
        let collected_at = record.collected_at.to_rfc3339();

        let inserted = self
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO pending_records
                        (id, client_id, amount, record_version, payload, collected_at, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        id.as_str(),
                        client_id,
                        amount,
                        version,
                        payload,
                        collected_at,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(changed == 1)
            })
            .await?;

        if inserted {
            info!(record_id = %record.id, amount = record.amount, "Record enqueued");
        } else {
            debug!(record_id = %record.id, "Record already queued");
        }
        Ok(inserted)
    }

    /// All queued records, oldest enqueue first.
    ///
    /// Rows whose payload cannot be decoded are logged and skipped; they stay
    /// on disk and still count toward `count()`.
    pub async fn list_pending(&self) -> Result<Vec<PendingCollectionRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT id, payload FROM pending_records ORDER BY seq")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, payload) = row?;
                match serde_json::from_str::<PendingCollectionRecord>(&payload) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(record_id = %id, error = %e, "Skipping undecodable queued record"),
                }
            }
            Ok(records)
        })
        .await
    }

    /// Look up one queued record
    pub async fn get(&self, id: &RecordId) -> Result<Option<PendingCollectionRecord>, StoreError> {
        let id = id.clone();
        let payload: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT payload FROM pending_records WHERE id = ?1",
                        [id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }

    /// Delete a record. Removing an id that is not queued is `Ok(false)`.
    pub async fn remove(&self, id: &RecordId) -> Result<bool, StoreError> {
        let key = id.clone();
        let removed = self
            .with_conn(move |conn| {
                let changed =
                    conn.execute("DELETE FROM pending_records WHERE id = ?1", [key.as_str()])?;
                Ok(changed > 0)
            })
            .await?;

        if removed {
            debug!(record_id = %id, "Record removed from queue");
        }
        Ok(removed)
    }

    /// Number of queued records
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_records", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    /// Wipe the pending queue. Administrative use only.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        let removed = self
            .with_conn(|conn| Ok(conn.execute("DELETE FROM pending_records", [])? as u64))
            .await?;
        warn!(count = removed, "Pending queue cleared");
        Ok(removed)
    }

    /// Move a record from the queue to the rejection log in one transaction.
    ///
    /// Returns `false` if the id was not queued.
    pub async fn reject(&self, id: &RecordId, reason: &str) -> Result<bool, StoreError> {
        let key = id.clone();
        let reason_owned = reason.to_string();
        let moved = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let payload: Option<String> = tx
                    .query_row(
                        "SELECT payload FROM pending_records WHERE id = ?1",
                        [key.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(payload) = payload else {
                    return Ok(false);
                };

                tx.execute(
                    "INSERT INTO rejected_records (id, payload, reason, rejected_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET reason = excluded.reason, rejected_at = excluded.rejected_at",
                    params![key.as_str(), payload, reason_owned, Utc::now().to_rfc3339()],
                )?;
                tx.execute("DELETE FROM pending_records WHERE id = ?1", [key.as_str()])?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if moved {
            warn!(record_id = %id, reason, "Record rejected by ledger, moved to rejection log");
        }
        Ok(moved)
    }

    /// Records the ledger refused, oldest first
    pub async fn list_rejected(&self) -> Result<Vec<RejectedRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT payload, reason, rejected_at FROM rejected_records ORDER BY rejected_at",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut rejected = Vec::new();
            for row in rows {
                let (payload, reason, rejected_at) = row?;
                let record = serde_json::from_str(&payload)?;
                let rejected_at = DateTime::parse_from_rfc3339(&rejected_at)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?
                    .with_timezone(&Utc);
                rejected.push(RejectedRecord {
                    record,
                    reason,
                    rejected_at,
                });
            }
            Ok(rejected)
        })
        .await
    }

    /// Empty the rejection log once entries have been followed up
    pub async fn purge_rejected(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM rejected_records", [])? as u64))
            .await
    }
}

fn open_connection(location: &StoreLocation) -> Result<Connection, StoreError> {
    let conn = match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("creating {}: {}", parent.display(), e))
                })?;
            }
            let conn = Connection::open(path)
                .map_err(|e| StoreError::Unavailable(format!("opening {}: {}", path.display(), e)))?;
            conn.busy_timeout(Duration::from_secs(5))?;
            // WAL plus FULL sync: a committed enqueue survives power loss
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
            info!(path = %path.display(), "Pending record store opened");
            conn
        }
        StoreLocation::Memory => {
            debug!("Opening in-memory pending record store");
            Connection::open_in_memory()?
        }
    };

    schema::init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CollectionForm, PendingCollectionRecord};
    use chrono::Utc;

    fn record(amount: i64) -> PendingCollectionRecord {
        let collection = CollectionForm {
            client_id: "client-7".into(),
            amount,
            payment_method: "mobile_money".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        PendingCollectionRecord::assemble(collection, None, Utc::now())
    }

    #[tokio::test]
    async fn test_enqueue_and_count() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        assert!(store.enqueue(&record(100)).await.unwrap());
        assert!(store.enqueue(&record(200)).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_and_keeps_first_write() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        let original = record(100);
        assert!(store.enqueue(&original).await.unwrap());

        let mut altered = original.clone();
        altered.amount = 999;
        assert!(!store.enqueue(&altered).await.unwrap());

        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get(&original.id).await.unwrap().unwrap();
        assert_eq!(stored.amount, 100);
    }

    #[tokio::test]
    async fn test_list_pending_in_enqueue_order() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        let a = record(1);
        let b = record(2);
        store.enqueue(&a).await.unwrap();
        store.enqueue(&b).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending, vec![a, b]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        let r = record(50);
        store.enqueue(&r).await.unwrap();

        assert!(store.remove(&r.id).await.unwrap());
        assert!(!store.remove(&r.id).await.unwrap());
        assert!(!store.remove(&RecordId::from("never-queued")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reject_moves_record_to_log() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        let r = record(75);
        store.enqueue(&r).await.unwrap();

        assert!(store.reject(&r.id, "unknown client").await.unwrap());
        assert!(!store.reject(&r.id, "unknown client").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);

        let rejected = store.list_rejected().await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].record, r);
        assert_eq!(rejected[0].reason, "unknown client");

        assert_eq!(store.purge_rejected().await.unwrap(), 1);
        assert!(store.list_rejected().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_wipes_pending_only() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        let kept = record(10);
        store.enqueue(&kept).await.unwrap();
        store.reject(&kept.id, "bad").await.unwrap();
        store.enqueue(&record(20)).await.unwrap();
        store.enqueue(&record(30)).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.list_rejected().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_not_unavailable() {
        let store = PendingRecordStore::open_in_memory().await.unwrap();
        let mut bad = record(10);
        bad.amount = -5;

        let err = store.enqueue(&bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)), "got {:?}", err);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = PendingRecordStore::in_memory();
        store.open().await.unwrap();
        store.enqueue(&record(5)).await.unwrap();
        store.open().await.unwrap();
        // Reopening must not swap in a fresh in-memory database
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
