//! Durable local queue of error records.
//!
//! Records live in a single SQLite table keyed by an auto-incrementing id, so
//! insertion order is drain order. The only way records leave the store is a
//! [`LogStore::select_batch`] followed by [`LogStore::delete_batch`] of exactly
//! those ids.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::record::{now_local, Batch, ErrorRecord, TIME_FORMAT};

const SQL_CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS error (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        file        TEXT,
        line        INTEGER,
        "column"    INTEGER,
        message     TEXT,
        stack       TEXT,
        remark      TEXT,
        tenant_code TEXT,
        user_code   TEXT,
        time        DATETIME DEFAULT (datetime('now', 'localtime'))
    );
"#;

const SQL_INSERT: &str = r#"
    INSERT INTO error (file, line, "column", message, stack, remark, tenant_code, user_code, time)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#;

const SQL_SELECT_COLUMNS: &str = r#"
    SELECT id, file, line, "column", message, stack, remark, tenant_code, user_code, time
    FROM error
"#;

/// Where the queue's database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Volatile store, used by tests and hosts without a writable disk
    Memory,
}

/// Durable, ordered, at-least-once queue of error records.
///
/// The connection is opened lazily by [`LogStore::ensure_ready`]; concurrent
/// callers observe exactly one initialization. A failed initialization is not
/// cached and is attempted again on the next call.
///
/// SQLite is blocking, so every statement runs on tokio's blocking pool and
/// async callers never stall a runtime worker.
pub struct LogStore {
    location: StoreLocation,
    conn: OnceCell<Arc<Mutex<Connection>>>,
}

impl LogStore {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            conn: OnceCell::new(),
        }
    }

    pub fn open_file(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Open the database and create the schema if absent. Idempotent.
    pub async fn ensure_ready(&self) -> Result<(), StoreError> {
        self.connection().await?;
        Ok(())
    }

    async fn connection(&self) -> Result<Arc<Mutex<Connection>>, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let location = self.location.clone();
                let conn = task::spawn_blocking(move || open_connection(&location)).await??;
                Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
            })
            .await?;
        Ok(conn.clone())
    }

    /// Run `op` against the open connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection().await?;
        task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            op(&mut *guard)
        })
        .await?
    }

    /// Persist `record` and return its new id.
    ///
    /// A single INSERT: the record is either fully written or absent.
    pub async fn append(&self, record: &ErrorRecord) -> Result<i64, StoreError> {
        let record = record.clone();
        let id = self
            .run(move |conn| {
                let occurred_at = record.occurred_at.unwrap_or_else(now_local);
                conn.execute(
                    SQL_INSERT,
                    params![
                        record.file,
                        record.line,
                        record.column,
                        record.message,
                        record.stack,
                        record.remark,
                        record.tenant_code,
                        record.user_code,
                        occurred_at.format(TIME_FORMAT).to_string(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!(id, "Record appended to local store");
        Ok(id)
    }

    /// Up to `limit` oldest records. An empty batch is a normal result.
    pub async fn select_batch(&self, limit: usize) -> Result<Batch, StoreError> {
        let records = self
            .run(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY id ASC LIMIT ?1", SQL_SELECT_COLUMNS))?;
                let records = stmt
                    .query_map([limit as i64], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;

        debug!(count = records.len(), limit, "Selected batch from local store");
        Ok(Batch::new(records))
    }

    /// Delete the given ids and return how many rows went away.
    ///
    /// Runs in one transaction. Zero is a valid result; callers decide whether
    /// it is an anomaly.
    pub async fn delete_batch(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let requested = ids.len();
        let ids = ids.to_vec();
        let deleted = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                {
                    let mut stmt = tx.prepare("DELETE FROM error WHERE id = ?1")?;
                    for id in &ids {
                        deleted += stmt.execute([id])?;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;

        if deleted < requested {
            warn!(requested, deleted, "Some records were already gone");
        }
        Ok(deleted)
    }

    /// Every stored record, oldest first. Read-only diagnostics.
    pub async fn query_all(&self) -> Result<Vec<ErrorRecord>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", SQL_SELECT_COLUMNS))?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Number of records waiting to be drained.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM error", [], |r| r.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

fn open_connection(location: &StoreLocation) -> Result<Connection, StoreError> {
    let conn = match location {
        StoreLocation::File(path) => Connection::open(path),
        StoreLocation::Memory => Connection::open_in_memory(),
    }
    .map_err(StoreError::Open)?;

    conn.execute_batch(SQL_CREATE_TABLE)
        .map_err(StoreError::Open)?;

    info!(location = ?location, "Local log store opened");
    Ok(conn)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    let time: Option<String> = row.get(9)?;
    let message: Option<String> = row.get(4)?;

    let mut record = ErrorRecord::new(message.unwrap_or_default());
    record.id = Some(row.get(0)?);
    record.file = row.get(1)?;
    record.line = row.get(2)?;
    record.column = row.get(3)?;
    record.stack = row.get(5)?;
    record.remark = row.get(6)?;
    record.tenant_code = row.get(7)?;
    record.user_code = row.get(8)?;
    record.occurred_at = time.and_then(|t| NaiveDateTime::parse_from_str(&t, TIME_FORMAT).ok());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> ErrorRecord {
        ErrorRecord::new(message)
            .with_file("app.js")
            .with_location(Some(1), Some(2))
    }

    #[tokio::test]
    async fn test_operations_before_ready_open_lazily() {
        let store = LogStore::in_memory();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = LogStore::in_memory();
        let first = store.append(&record("a")).await.unwrap();
        let second = store.append(&record("b")).await.unwrap();
        assert!(second > first);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_select_batch_is_oldest_first_and_bounded() {
        let store = LogStore::in_memory();
        for i in 0..5 {
            store.append(&record(&format!("m{}", i))).await.unwrap();
        }

        let batch = store.select_batch(3).await.unwrap();
        let messages: Vec<_> = batch.records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["m0", "m1", "m2"]);
        assert!(batch.records.iter().all(|r| r.id.is_some()));

        // Selecting does not remove anything
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_select_from_empty_store() {
        let store = LogStore::in_memory();
        let batch = store.select_batch(1000).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_deletion() {
        let store = LogStore::in_memory();
        for i in 0..4 {
            store.append(&record(&format!("m{}", i))).await.unwrap();
        }

        let batch = store.select_batch(2).await.unwrap();
        let ids = batch.ids();
        assert_eq!(store.delete_batch(&ids).await.unwrap(), 2);

        let remaining = store.query_all().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| !ids.contains(&r.id.unwrap())));
    }

    #[tokio::test]
    async fn test_delete_unknown_ids_returns_zero() {
        let store = LogStore::in_memory();
        store.append(&record("a")).await.unwrap();
        assert_eq!(store.delete_batch(&[9999]).await.unwrap(), 0);
        assert_eq!(store.delete_batch(&[]).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fields_survive_storage() {
        let store = LogStore::in_memory();
        let when = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", TIME_FORMAT).unwrap();
        let mut original = record("boom")
            .with_stack("at f()")
            .with_remark("ctx")
            .with_occurred_at(when);
        original.tenant_code = Some("t".to_string());
        original.user_code = Some("u".to_string());

        let id = store.append(&original).await.unwrap();
        let stored = store.query_all().await.unwrap().remove(0);

        assert_eq!(stored.id, Some(id));
        original.id = Some(id);
        assert_eq!(stored, original);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_log.db");

        {
            let store = LogStore::open_file(&path);
            store.append(&record("persisted")).await.unwrap();
        }

        let reopened = LogStore::open_file(&path);
        let records = reopened.query_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "persisted");
    }

    #[tokio::test]
    async fn test_concurrent_ensure_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open_file(dir.path().join("_log.db")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.ensure_ready().await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_from_spawned_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open_file(dir.path().join("_log.db")));

        let handles: Vec<_> = (0..8)
            .map(|task| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        store.append(&record(&format!("t{}-{}", task, i))).await?;
                    }
                    Ok::<_, StoreError>(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 400);

        let batch = store.select_batch(1000).await.unwrap();
        assert_eq!(batch.len(), 400);
        assert_eq!(store.delete_batch(&batch.ids()).await.unwrap(), 400);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("_log.db");
        let store = LogStore::open_file(&path);

        assert!(matches!(store.ensure_ready().await, Err(StoreError::Open(_))));

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        store.ensure_ready().await.unwrap();
    }
}
