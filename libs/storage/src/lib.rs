//! Embedded peer table for the directory service.
//!
//! `Storage` wraps a single `rusqlite::Connection` behind a `parking_lot`
//! mutex, the same shape `innernet-server`'s `Db` type uses for its
//! single-writer SQLite handle. SQLite's own transactional semantics give us
//! the atomicity and read-committed isolation the directory needs; we never
//! hold the mutex across an `.await` because every call here is synchronous.

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub id: String,
    pub wg_public_key: String,
    pub endpoint_ip: Ipv4Addr,
    pub endpoint_port: u16,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no peer registered with id {0:?}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Opens (creating if necessary) the SQLite database at `path` and
    /// ensures the schema exists.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests so no filesystem state leaks
    /// between them.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS peers (
                id            TEXT PRIMARY KEY,
                wg_public_key TEXT NOT NULL,
                endpoint_ip   TEXT NOT NULL,
                endpoint_port INTEGER NOT NULL,
                last_seen     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_peers_last_seen ON peers (last_seen);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts or replaces the record by `id`. Atomic with respect to
    /// concurrent `upsert`/`list_active` calls because it runs inside an
    /// explicit transaction and the connection is single-writer.
    pub fn upsert(&self, record: &PeerRecord) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO peers (id, wg_public_key, endpoint_ip, endpoint_port, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                wg_public_key = excluded.wg_public_key,
                endpoint_ip   = excluded.endpoint_ip,
                endpoint_port = excluded.endpoint_port,
                last_seen     = excluded.last_seen",
            params![
                record.id,
                record.wg_public_key,
                record.endpoint_ip.to_string(),
                record.endpoint_port,
                record.last_seen.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PeerRecord>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, wg_public_key, endpoint_ip, endpoint_port, last_seen
             FROM peers WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Every record with `now - last_seen < window`, sorted by `last_seen`
    /// descending. `now` is read exactly once for the whole call.
    pub fn list_active(&self, window: Duration) -> Result<Vec<PeerRecord>, StorageError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, wg_public_key, endpoint_ip, endpoint_port, last_seen
             FROM peers WHERE last_seen > ?1 ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], row_to_record)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    /// Sets `last_seen` to now. Fails with `NotFound` if no row was affected.
    pub fn touch(&self, id: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "UPDATE peers SET last_seen = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        tx.commit()?;

        if affected == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM peers WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Total distinct peers with a `last_seen` in the last 24 hours.
    pub fn count_seen_within(&self, window: Duration) -> Result<u64, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM peers WHERE last_seen > ?1",
            params![cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn close(self) {
        // Dropping the last `Arc<Mutex<Connection>>` runs SQLite's own
        // shutdown; nothing else to flush since every write already
        // committed before returning.
        tracing::debug!("closing peer storage");
        drop(self);
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PeerRecord> {
    let endpoint_ip: String = row.get(2)?;
    let last_seen: String = row.get(4)?;

    Ok(PeerRecord {
        id: row.get(0)?,
        wg_public_key: row.get(1)?,
        endpoint_ip: Ipv4Addr::from_str(&endpoint_ip).unwrap_or(Ipv4Addr::UNSPECIFIED),
        endpoint_port: row.get(3)?,
        last_seen: DateTime::parse_from_rfc3339(&last_seen)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> PeerRecord {
        PeerRecord {
            id: id.to_string(),
            wg_public_key: "key".to_string(),
            endpoint_ip: Ipv4Addr::new(203, 0, 113, 5),
            endpoint_port: 51820,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = Storage::open_in_memory().unwrap();
        store.upsert(&record("a")).unwrap();

        let got = store.get("a").unwrap().unwrap();
        assert_eq!(got.id, "a");
        assert_eq!(got.endpoint_port, 51820);
    }

    #[test]
    fn repeated_upsert_does_not_duplicate() {
        let store = Storage::open_in_memory().unwrap();
        store.upsert(&record("a")).unwrap();

        let mut second = record("a");
        second.endpoint_port = 9999;
        store.upsert(&second).unwrap();

        let active = store.list_active(Duration::from_secs(60)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].endpoint_port, 9999);
    }

    #[test]
    fn list_active_excludes_stale_records() {
        let store = Storage::open_in_memory().unwrap();
        let mut stale = record("old");
        stale.last_seen = Utc::now() - chrono::Duration::seconds(120);
        store.upsert(&stale).unwrap();
        store.upsert(&record("fresh")).unwrap();

        let active = store.list_active(Duration::from_secs(30)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "fresh");
    }

    #[test]
    fn touch_refreshes_last_seen_and_detects_missing() {
        let store = Storage::open_in_memory().unwrap();
        store.upsert(&record("a")).unwrap();

        let before = store.get("a").unwrap().unwrap().last_seen;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.touch("a").unwrap();
        let after = store.get("a").unwrap().unwrap().last_seen;

        assert!(after >= before);
        assert!(matches!(
            store.touch("ghost"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_record() {
        let store = Storage::open_in_memory().unwrap();
        store.upsert(&record("a")).unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn list_active_sorted_by_last_seen_descending() {
        let store = Storage::open_in_memory().unwrap();
        let mut older = record("older");
        older.last_seen = Utc::now() - chrono::Duration::seconds(5);
        store.upsert(&older).unwrap();
        store.upsert(&record("newer")).unwrap();

        let active = store.list_active(Duration::from_secs(60)).unwrap();
        assert_eq!(active[0].id, "newer");
        assert_eq!(active[1].id, "older");
    }
}
