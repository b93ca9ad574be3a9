//! SQLite storage implementation.
//!
//! Wraps a single rusqlite `Connection` in a mutex. Uniqueness of trackers
//! and dedup records is enforced by the schema, so concurrent writers to the
//! same destination cannot produce duplicate rows.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::{ProcessedEvent, Tracker};
use crate::storage::TrackerStore;
use crate::storage::migrations;

/// SQLite-backed tracker store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and run pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        log::info!("Database opened at {}", path.display());

        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Every statement is atomic on its own, so a panicked holder cannot
        // leave the connection half-written.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_trackers(&self, sql: &str, destination: Option<&str>) -> Result<Vec<Tracker>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(Tracker {
                source_url: row.get(0)?,
                destination: row.get(1)?,
            })
        };
        let rows = match destination {
            Some(dest) => stmt.query_map(params![dest], map_row)?,
            None => stmt.query_map([], map_row)?,
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

impl TrackerStore for SqliteStore {
    fn add_tracker(&self, url: &str, destination: &str) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO trackers (url, destination) VALUES (?1, ?2)",
            params![url, destination],
        )?;
        Ok(inserted > 0)
    }

    fn remove_tracker(&self, url: &str, destination: &str) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM trackers WHERE url = ?1 AND destination = ?2",
            params![url, destination],
        )?;
        Ok(deleted > 0)
    }

    fn list_trackers(&self) -> Result<Vec<Tracker>> {
        self.query_trackers("SELECT url, destination FROM trackers", None)
    }

    fn trackers_for(&self, destination: &str) -> Result<Vec<Tracker>> {
        self.query_trackers(
            "SELECT url, destination FROM trackers WHERE destination = ?1",
            Some(destination),
        )
    }

    fn is_processed(&self, event_id: &str, destination: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM processed_events WHERE event_id = ?1 AND destination = ?2",
            params![event_id, destination],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn mark_processed(&self, event_id: &str, destination: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO processed_events (event_id, destination, processed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (event_id, destination) DO UPDATE SET processed_at = excluded.processed_at",
            params![event_id, destination, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn clear_processed(&self, destination: &str) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM processed_events WHERE destination = ?1",
            params![destination],
        )?)
    }

    fn processed_for(&self, destination: &str) -> Result<Vec<ProcessedEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT event_id, destination, processed_at FROM processed_events
             WHERE destination = ?1 ORDER BY processed_at DESC",
        )?;
        let rows = stmt.query_map(params![destination], |row| {
            let secs: i64 = row.get(2)?;
            Ok(ProcessedEvent {
                event_id: row.get(0)?,
                destination: row.get(1)?,
                processed_at: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://www.eventbrite.ca/d/ca--los-angeles/all-events/";

    #[test]
    fn test_add_tracker_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.add_tracker(URL, "100").unwrap());
        assert!(!store.add_tracker(URL, "100").unwrap());

        let trackers = store.list_trackers().unwrap();
        assert_eq!(trackers, vec![Tracker::new(URL, "100")]);
    }

    #[test]
    fn test_same_url_different_destinations() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_tracker(URL, "100").unwrap();
        store.add_tracker(URL, "200").unwrap();

        assert_eq!(store.list_trackers().unwrap().len(), 2);
        assert_eq!(store.trackers_for("200").unwrap(), vec![Tracker::new(URL, "200")]);
    }

    #[test]
    fn test_remove_missing_tracker_is_ok() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.remove_tracker(URL, "100").unwrap());

        store.add_tracker(URL, "100").unwrap();
        assert!(store.remove_tracker(URL, "100").unwrap());
        assert!(store.list_trackers().unwrap().is_empty());
    }

    #[test]
    fn test_mark_processed_is_per_destination() {
        let store = SqliteStore::in_memory().unwrap();
        store.mark_processed("e1", "100").unwrap();

        assert!(store.is_processed("e1", "100").unwrap());
        assert!(!store.is_processed("e1", "200").unwrap());
        assert!(!store.is_processed("e2", "100").unwrap());
    }

    #[test]
    fn test_remark_keeps_single_row() {
        let store = SqliteStore::in_memory().unwrap();
        store.mark_processed("e1", "100").unwrap();
        store.mark_processed("e1", "100").unwrap();

        assert_eq!(store.processed_for("100").unwrap().len(), 1);
    }

    #[test]
    fn test_deregistration_clears_only_its_scope() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_tracker(URL, "100").unwrap();
        store.add_tracker(URL, "200").unwrap();
        for id in ["e1", "e2"] {
            store.mark_processed(id, "100").unwrap();
            store.mark_processed(id, "200").unwrap();
        }

        store.remove_tracker(URL, "100").unwrap();
        assert_eq!(store.clear_processed("100").unwrap(), 2);

        assert!(!store.is_processed("e1", "100").unwrap());
        assert!(!store.is_processed("e2", "100").unwrap());
        assert!(store.is_processed("e1", "200").unwrap());
        assert!(store.is_processed("e2", "200").unwrap());
        assert_eq!(store.list_trackers().unwrap(), vec![Tracker::new(URL, "200")]);
    }

    #[test]
    fn test_file_database_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("events.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.add_tracker(URL, "100").unwrap();
            store.mark_processed("e1", "100").unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_trackers().unwrap().len(), 1);
        assert!(reopened.is_processed("e1", "100").unwrap());
    }
}
