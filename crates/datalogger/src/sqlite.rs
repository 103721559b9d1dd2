// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite reading store
//!
//! Append-only readings table with a published flag.

use crate::error::StoreError;
use crate::store::{Reading, ReadingStore, StoreCounts};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite reading store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE readings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     timestamp TEXT NOT NULL,
///     data TEXT NOT NULL,
///     is_published INTEGER NOT NULL DEFAULT 0
/// );
/// CREATE INDEX idx_readings_unpublished ON readings(is_published, timestamp);
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a file-based store, creating the file and schema if needed.
    ///
    /// Missing parent directories are created first.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::from_sqlite("opening database", e))?;
        Self::with_connection(conn)
    }

    /// Open an existing file-based store.
    ///
    /// Fails with [`StoreError::NotFound`] instead of silently creating an
    /// empty database when the file is missing.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::from_sqlite("opening database", e))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::from_sqlite("creating in-memory database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL,
                is_published INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_readings_unpublished
                ON readings(is_published, timestamp);",
        )
        .map_err(|e| StoreError::from_sqlite("initializing schema", e))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Helper function to map a row to a Reading
    fn row_to_reading(row: &rusqlite::Row) -> rusqlite::Result<Reading> {
        Ok(Reading {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            payload: row.get(2)?,
            published: row.get::<_, i64>(3)? != 0,
        })
    }
}

impl ReadingStore for SqliteStore {
    fn insert_reading(&self, timestamp: &str, payload: &str) -> Result<i64, StoreError> {
        if let Err(e) = serde_json::from_str::<serde_json::Value>(payload) {
            return Err(StoreError::ConstraintViolation(format!(
                "reading payload is not valid JSON: {}",
                e
            )));
        }

        let conn = self.lock();
        conn.execute(
            "INSERT INTO readings (timestamp, data, is_published) VALUES (?1, ?2, 0)",
            params![timestamp, payload],
        )
        .map_err(|e| StoreError::from_sqlite("inserting reading", e))?;

        Ok(conn.last_insert_rowid())
    }

    fn fetch_unpublished(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, data, is_published
                 FROM readings
                 WHERE is_published = 0
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?1",
            )
            .map_err(|e| StoreError::from_sqlite("fetching unpublished readings", e))?;

        let limit = limit.min(i64::MAX as usize) as i64;
        let readings = stmt
            .query_map([limit], Self::row_to_reading)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| StoreError::from_sqlite("fetching unpublished readings", e))?;

        Ok(readings)
    }

    fn mark_published(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::from_sqlite("starting transaction", e))?;
        {
            let mut update = tx
                .prepare("UPDATE readings SET is_published = 1 WHERE id = ?1")
                .map_err(|e| StoreError::from_sqlite("marking readings published", e))?;
            for id in ids {
                let changed = update
                    .execute([id])
                    .map_err(|e| StoreError::from_sqlite("marking readings published", e))?;
                if changed != 1 {
                    // Dropping `tx` without commit rolls back every earlier update.
                    return Err(StoreError::ConstraintViolation(format!(
                        "reading {} does not exist; no readings were marked",
                        id
                    )));
                }
            }
        }
        tx.commit()
            .map_err(|e| StoreError::from_sqlite("committing transaction", e))?;

        tracing::debug!("Marked {} readings as published", ids.len());
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))
            .map_err(|e| StoreError::from_sqlite("counting readings", e))?;

        Ok(count as usize)
    }

    fn count_unpublished(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM readings WHERE is_published = 0",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::from_sqlite("counting unpublished readings", e))?;

        Ok(count as usize)
    }

    fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.lock();
        let (total, unpublished): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_published = 0 THEN 1 ELSE 0 END), 0)
                 FROM readings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| StoreError::from_sqlite("counting readings", e))?;

        Ok(StoreCounts {
            total: total as usize,
            unpublished: unpublished as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(store: &SqliteStore, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                store
                    .insert_reading(
                        &format!("2025-06-01T12:00:{:02}", i),
                        &format!("{{\"test_sensor\":\"value_abc\",\"reading\":{}}}", i),
                    )
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_insert_and_fetch_unpublished() {
        let store = SqliteStore::new_in_memory().unwrap();
        let ids = seed(&store, 5);

        let batch = store.fetch_unpublished(50).unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
        assert!(batch.iter().all(|r| !r.published));
        assert_eq!(batch[2].payload, "{\"test_sensor\":\"value_abc\",\"reading\":2}");
    }

    #[test]
    fn test_fetch_orders_by_timestamp() {
        let store = SqliteStore::new_in_memory().unwrap();
        let late = store.insert_reading("2025-06-01T12:00:09", "{}").unwrap();
        let early = store.insert_reading("2025-06-01T12:00:01", "{}").unwrap();

        let batch = store.fetch_unpublished(10).unwrap();
        assert_eq!(batch[0].id, early);
        assert_eq!(batch[1].id, late);
    }

    #[test]
    fn test_fetch_respects_limit() {
        let store = SqliteStore::new_in_memory().unwrap();
        seed(&store, 10);

        assert_eq!(store.fetch_unpublished(3).unwrap().len(), 3);
        assert!(store.fetch_unpublished(0).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_is_stable() {
        let store = SqliteStore::new_in_memory().unwrap();
        seed(&store, 4);

        let first = store.fetch_unpublished(50).unwrap();
        let second = store.fetch_unpublished(50).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_published() {
        let store = SqliteStore::new_in_memory().unwrap();
        let ids = seed(&store, 5);

        store.mark_published(&ids[..3]).unwrap();
        assert_eq!(store.count_unpublished().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 5);

        let remaining = store.fetch_unpublished(50).unwrap();
        assert_eq!(
            remaining.iter().map(|r| r.id).collect::<Vec<_>>(),
            ids[3..].to_vec()
        );
    }

    #[test]
    fn test_mark_published_is_all_or_nothing() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut ids = seed(&store, 3);
        ids.insert(1, 9999);

        let err = store.mark_published(&ids).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(store.count_unpublished().unwrap(), 3);
    }

    #[test]
    fn test_counts_single_snapshot() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.counts().unwrap(), StoreCounts::default());

        let ids = seed(&store, 4);
        store.mark_published(&ids[..1]).unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.unpublished, 3);
        assert_eq!(counts.published(), 1);
    }

    #[test]
    fn test_mark_published_empty_is_noop() {
        let store = SqliteStore::new_in_memory().unwrap();
        seed(&store, 2);
        store.mark_published(&[]).unwrap();
        assert_eq!(store.count_unpublished().unwrap(), 2);
    }

    #[test]
    fn test_insert_rejects_invalid_json() {
        let store = SqliteStore::new_in_memory().unwrap();
        let err = store.insert_reading("2025-06-01T12:00:00", "not json").unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_open_existing_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        match SqliteStore::open_existing(&path) {
            Err(StoreError::NotFound { path: p }) => assert_eq!(p, path),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected NotFound"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datalogger").join("data").join("readings.db");

        let store = SqliteStore::open(&path).unwrap();
        store.insert_reading("2025-06-01T12:00:00", "{}").unwrap();

        assert!(path.is_file());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        match SqliteStore::open(blocker.join("sub").join("readings.db")) {
            Err(StoreError::CreateDir { path, .. }) => assert_eq!(path, blocker.join("sub")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected CreateDir"),
        }
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            seed(&store, 2);
        }

        let store = SqliteStore::open_existing(&path).unwrap();
        assert_eq!(store.count_unpublished().unwrap(), 2);
    }
}
